//! Walks a `run` method body looking for statically-discoverable dependency
//! edges: calls of the shape `ctx.value::<Dep>()`, plus same-impl helper
//! methods transitively reachable from `run` (the Rust analogue of "a
//! constant reference followed by a method call" and "helper methods on the
//! same class contribute transitively").

use std::collections::{HashMap, HashSet};

use syn::{
    visit::{self, Visit},
    Expr, ExprMethodCall, GenericArgument, ImplItemFn, Path, Type,
};

/// Collects every type path passed as a turbofish argument to a call named
/// `value`, following same-impl helper calls reachable from the entry point.
pub fn find_static_dependencies(methods: &HashMap<String, &ImplItemFn>, entry: &str) -> Vec<Path> {
    let mut collector = DepCollector {
        methods,
        deps: Vec::new(),
        seen_paths: HashSet::new(),
        visited_methods: HashSet::new(),
        queue: Vec::new(),
    };

    collector.visit_method(entry);

    while let Some(name) = collector.queue.pop() {
        collector.visit_method(&name);
    }

    collector.deps
}

struct DepCollector<'a> {
    methods: &'a HashMap<String, &'a ImplItemFn>,
    deps: Vec<Path>,
    seen_paths: HashSet<String>,
    visited_methods: HashSet<String>,
    queue: Vec<String>,
}

impl<'a> DepCollector<'a> {
    fn visit_method(&mut self, name: &str) {
        if !self.visited_methods.insert(name.to_owned()) {
            return;
        }
        if let Some(item) = self.methods.get(name).copied() {
            self.visit_block(&item.block);
        }
    }

    fn push_dep(&mut self, path: Path) {
        let key = quote::quote!(#path).to_string();
        if self.seen_paths.insert(key) {
            self.deps.push(path);
        }
    }
}

impl<'a, 'ast> Visit<'ast> for DepCollector<'a> {
    fn visit_expr_method_call(&mut self, node: &'ast ExprMethodCall) {
        if node.method == "value" {
            if let Some(turbofish) = &node.turbofish {
                for arg in &turbofish.args {
                    if let GenericArgument::Type(Type::Path(type_path)) = arg {
                        self.push_dep(type_path.path.clone());
                    }
                }
            }
        } else if let Expr::Path(recv) = node.receiver.as_ref() {
            if recv.path.is_ident("self") {
                let name = node.method.to_string();
                if self.methods.contains_key(&name) && !self.visited_methods.contains(&name) {
                    self.queue.push(name);
                }
            }
        }

        visit::visit_expr_method_call(self, node);
    }
}
