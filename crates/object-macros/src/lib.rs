//! Derives the little-endian, single-byte `Read`/`Write` boilerplate for the
//! small discriminant enums used throughout the object file format
//! (`RpnOp`, `SectionType`, `SymbolType`, `PatchType`, `FileNodeKind`).

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse, Attribute, Data, DataEnum, DeriveInput, Generics, Ident};

/// Derives `rgbds_object::Read` and `rgbds_object::Write` for a
/// fieldless, `#[repr(u8)]` enum whose variants each carry an explicit
/// discriminant.
#[proc_macro_derive(ByteCode)]
pub fn derive_bytecode(input: TokenStream) -> TokenStream {
    let derive_input: DeriveInput = parse(input).unwrap();

    match derive_input.data {
        Data::Enum(ref enum_data) => derive_bytecode_impl(
            &derive_input.ident,
            enum_data,
            &derive_input.generics,
            fetch_repr(&derive_input.attrs),
        ),
        Data::Struct(_) | Data::Union(_) => {
            panic!("`ByteCode` cannot be derived onto `struct` or `union`")
        }
    }
}

fn derive_bytecode_impl(
    enum_name: &Ident,
    data: &DataEnum,
    generics: &Generics,
    repr: Option<Ident>,
) -> TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let repr = repr.expect("a `#[repr(u8)]` attribute must be present");
    if repr != "u8" {
        panic!("`ByteCode` only supports `#[repr(u8)]` enums");
    }

    let (read_arms, write_arms, variants): (Vec<_>, Vec<_>, Vec<_>) = data
        .variants
        .iter()
        .map(|variant| {
            let name = &variant.ident;
            let discriminant = match &variant.discriminant {
                Some((_, syn::Expr::Lit(syn::ExprLit { lit: syn::Lit::Int(int), .. }))) => int,
                _ => panic!(
                    "all variants must have a discriminant, and it must be an integer literal"
                ),
            };

            (
                quote! { #discriminant => Self::#name },
                quote! { Self::#name => #discriminant },
                quote! { #name },
            )
        })
        .fold((Vec::new(), Vec::new(), Vec::new()), |mut acc, (read, write, variant)| {
            acc.0.push(read);
            acc.1.push(write);
            acc.2.push(variant);
            acc
        });

    let test_name = proc_macro2::Ident::new(
        &format!("bytecode_round_trip_{}", enum_name.to_string().to_lowercase()),
        proc_macro2::Span::call_site(),
    );

    quote! {
        impl #impl_generics crate::Read for #enum_name #ty_generics
        #where_clause
        {
            fn read(input: crate::Input<'_>) -> crate::Result<'_, Self> {
                let (input, discriminant) = ::nom::number::complete::le_u8(input)?;

                Ok((
                    input,
                    match discriminant {
                        #( #read_arms, )*
                        _ => {
                            return Err(::nom::Err::Error(::nom::error::Error::new(
                                input,
                                ::nom::error::ErrorKind::Alt,
                            )))
                        }
                    },
                ))
            }
        }

        impl #impl_generics crate::Write for #enum_name #ty_generics
        #where_clause
        {
            fn write(&self, output: &mut Vec<u8>) {
                let byte: u8 = match self {
                    #( #write_arms, )*
                };

                output.push(byte);
            }
        }

        #[cfg(test)]
        #[test]
        fn #test_name() {
            #(
                {
                    let mut bytes = Vec::new();
                    #enum_name::#variants.write(&mut bytes);
                    assert_eq!(
                        #enum_name::read(&bytes),
                        Ok((&[][..], #enum_name::#variants))
                    );
                }
            )*
        }
    }
    .into()
}

fn fetch_repr(attrs: &[Attribute]) -> Option<Ident> {
    attrs.iter().find_map(|attr| {
        if !attr.path().is_ident("repr") {
            return None;
        }

        let mut repr = None;
        let _ = attr.parse_nested_meta(|meta| {
            repr = meta.path.get_ident().cloned();
            Ok(())
        });

        repr
    })
}
