use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{
    parse_macro_input, parse_quote, Data, DeriveInput, Error, Fields, GenericParam, Generics,
    Ident, Result, Type,
};

/// Derives `shmseg::Record` for a struct with named fields.
///
/// Fields are encoded back to back in declaration order with no padding, so
/// the encoded width is the sum of the field widths and does not depend on the
/// Rust layout of the struct. Every field type must itself implement `Record`.
#[proc_macro_derive(Record)]
pub fn derive_record(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = input.ident;

    let generics = add_trait_bounds(input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let fields = match named_fields(&input.data, &name.span()) {
        Ok(fields) => fields,
        Err(err) => return err.into_compile_error().into(),
    };

    let size = size_impl(&fields);
    let encode = encode_impl(&fields);
    let decode = decode_impl(&fields);

    let expanded = quote! {
        impl #impl_generics shmseg::Record for #name #ty_generics #where_clause {
            const SIZE: usize = #size;

            fn encode(&self, __buf: &mut [u8]) {
                #encode
            }

            fn decode(__buf: &[u8]) -> shmseg::error::Result<Self> {
                #decode
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

fn size_impl(fields: &[(Ident, Type)]) -> TokenStream {
    let tys = fields.iter().map(|(_, ty)| ty);
    quote! {
        0 #(+ <#tys as shmseg::Record>::SIZE)*
    }
}

fn encode_impl(fields: &[(Ident, Type)]) -> TokenStream {
    let steps = fields.iter().map(|(ident, ty)| {
        quote! {
            let __end = __at + <#ty as shmseg::Record>::SIZE;
            shmseg::Record::encode(&self.#ident, &mut __buf[__at..__end]);
            __at = __end;
        }
    });
    quote! {
        let mut __at = 0usize;
        #(#steps)*
        let _ = __at;
    }
}

fn decode_impl(fields: &[(Ident, Type)]) -> TokenStream {
    let steps = fields.iter().map(|(ident, ty)| {
        quote! {
            let __end = __at + <#ty as shmseg::Record>::SIZE;
            let #ident = <#ty as shmseg::Record>::decode(&__buf[__at..__end])?;
            __at = __end;
        }
    });
    let idents = fields.iter().map(|(ident, _)| ident);
    quote! {
        let mut __at = 0usize;
        #(#steps)*
        let _ = __at;
        Ok(Self { #(#idents),* })
    }
}

fn named_fields(data: &Data, span: &Span) -> Result<Vec<(Ident, Type)>> {
    let err_msg = "Record: only structs with named fields are supported";
    match data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => Ok(named
                .named
                .iter()
                .filter_map(|f| f.ident.clone().map(|ident| (ident, f.ty.clone())))
                .collect()),
            Fields::Unnamed(_) | Fields::Unit => Err(Error::new(*span, err_msg)),
        },
        Data::Enum(_) | Data::Union(_) => Err(Error::new(*span, err_msg)),
    }
}

fn add_trait_bounds(mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            type_param.bounds.push(parse_quote!(shmseg::Record));
        }
    }
    generics
}
