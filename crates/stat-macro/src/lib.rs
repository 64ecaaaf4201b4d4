// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use proc_macro::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::DeriveInput;
use syn::Field;
use syn::FieldsNamed;
use syn::Ident;
use syn::parse_macro_input;

/// Generate a [`flowdpi::engine::stat::StatProvider`] implementation
/// for a struct whose named fields are all
/// [`flowdpi::engine::stat::StatU64`] counters.
///
/// ```Rust
/// #[derive(StatProvider)]
/// struct WorkflowStats {
///     raw_packets: StatU64,
///     ip_packets: StatU64,
/// }
/// ```
///
/// expands to a plain-value `WorkflowStatsSnap` struct plus:
///
/// ```Rust
/// impl StatProvider for WorkflowStats {
///     const FIELD_NAMES: &'static [&'static str] =
///         &["raw_packets", "ip_packets"];
///     type Snap = WorkflowStatsSnap;
///
///     fn new() -> Self { ... }
///     fn snapshot(&self) -> Self::Snap { ... }
/// }
/// ```
#[proc_macro_derive(StatProvider)]
pub fn derive_stat_provider(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, vis, .. } = parse_macro_input!(input);
    let fields: Vec<Field> = match data {
        syn::Data::Struct(s) => match s.fields {
            syn::Fields::Named(FieldsNamed { named, .. }) => {
                named.into_iter().collect()
            }

            syn::Fields::Unnamed(_) => {
                panic!("StatProvider fields must be named");
            }

            syn::Fields::Unit => {
                panic!("StatProvider needs at least one counter");
            }
        },

        _ => panic!("StatProvider may only be derived for a struct"),
    };

    let fields_ident: Vec<Ident> =
        fields.iter().filter_map(|f| f.ident.clone()).collect();
    let ident_snap = format_ident!("{}Snap", ident);
    let doc = format!("A point-in-time copy of [`{ident}`].");

    let output: proc_macro2::TokenStream = quote! {
        #[doc = #doc]
        #[derive(
            Clone, Copy, Debug, Default, Eq, PartialEq, ::serde::Serialize,
        )]
        #vis struct #ident_snap {
            #( pub #fields_ident: u64, )*
        }

        impl ::flowdpi::engine::stat::StatProvider for #ident {
            const FIELD_NAMES: &'static [&'static str] =
                &[#( stringify!(#fields_ident), )*];
            type Snap = #ident_snap;

            fn new() -> Self {
                use ::flowdpi::engine::stat::StatU64;

                Self {
                    #( #fields_ident: StatU64::new(), )*
                }
            }

            fn snapshot(&self) -> Self::Snap {
                #ident_snap {
                    #( #fields_ident: self.#fields_ident.val(), )*
                }
            }
        }

        impl #ident_snap {
            /// The counters as `(name, value)` pairs, in declaration
            /// order.
            pub fn iter(
                &self,
            ) -> impl Iterator<Item = (&'static str, u64)> + '_ {
                [#( (stringify!(#fields_ident), self.#fields_ident), )*]
                    .into_iter()
            }
        }
    };

    output.into()
}
