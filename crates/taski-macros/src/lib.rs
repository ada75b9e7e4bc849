//! Derives a task's static dependency list from the body of its `run`
//! method and registers the task with the global task descriptor table.
//!
//! ```ignore
//! #[taski::task]
//! impl Task for Build {
//!     type Output = Artifact;
//!     async fn run(&mut self, ctx: &TaskContext) -> Result<Artifact, TaskError> {
//!         let sources = ctx.value::<Fetch>().await?;
//!         Ok(compile(&sources))
//!     }
//! }
//! ```
//!
//! expands to the same `impl` block plus a `static_dependencies` override
//! (unless one is already present) and an `inventory::submit!` registration
//! of the task's descriptor.

use std::collections::HashMap;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ImplItem, ImplItemFn, ItemImpl, Type};

mod analyze;

#[proc_macro_attribute]
pub fn task(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(item as ItemImpl);

    let self_ty = match input.self_ty.as_ref() {
        Type::Path(p) => p.path.clone(),
        other => {
            return syn::Error::new_spanned(other, "#[taski::task] requires a named Self type")
                .to_compile_error()
                .into()
        }
    };

    let has_explicit_deps = input.items.iter().any(|item| {
        matches!(item, ImplItem::Fn(f) if f.sig.ident == "static_dependencies")
    });

    if !has_explicit_deps {
        let methods: HashMap<String, &ImplItemFn> = input
            .items
            .iter()
            .filter_map(|item| match item {
                ImplItem::Fn(f) => Some((f.sig.ident.to_string(), f)),
                _ => None,
            })
            .collect();

        if methods.contains_key("run") {
            let deps = analyze::find_static_dependencies(&methods, "run");

            let dep_exprs = deps
                .iter()
                .map(|p| quote!(::taski::TaskTypeId::of::<#p>()));

            let generated: ImplItem = syn::parse_quote! {
                fn static_dependencies() -> &'static [::taski::TaskTypeId] {
                    static DEPS: ::std::sync::OnceLock<::std::vec::Vec<::taski::TaskTypeId>> =
                        ::std::sync::OnceLock::new();
                    DEPS.get_or_init(|| ::std::vec![ #(#dep_exprs),* ]).as_slice()
                }
            };

            input.items.push(generated);
        }
    }

    let registration = quote! {
        ::taski::inventory::submit! {
            ::taski::TaskDescriptor {
                id: ::taski::TaskTypeId::of::<#self_ty> as fn() -> ::taski::TaskTypeId,
                dependencies: <#self_ty as ::taski::Task>::static_dependencies
                    as fn() -> &'static [::taski::TaskTypeId],
                spawn_wrapper: ::taski::spawn_wrapper::<#self_ty>
                    as fn() -> ::std::sync::Arc<dyn ::taski::AnyWrapper>,
                clean: ::taski::executor::dispatch_clean::<#self_ty>
                    as fn(::std::sync::Arc<::taski::ExecutionContext>) -> ::taski::CleanFuture,
            }
        }
    };

    let output = quote! {
        #input
        #registration
    };

    output.into()
}
