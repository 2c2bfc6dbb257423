use crate::{
    IndexMap,
    types::{StdType, Type},
};
use alloc::{string::String, vec::Vec};
use kestrel_compiler_core::{Symbol, bytecode::NamespaceKind};

/// What the compiler may ask the type checker while lowering a tree.
///
/// Implementations are shared by every unit compiled in parallel, hence `Sync`.
pub trait Checker: Sync {
    /// Whether every value of `sub` is also a value of `sup`.
    fn is_subtype(&self, sub: &Type, sup: &Type) -> bool;

    /// The type of a well-known standard class.
    fn std_type(&self, std: StdType) -> Type {
        Type::std(std)
    }

    /// Namespaces, classes, mixins and interfaces defined by the program.
    fn namespaces(&self) -> &NamespaceTree;
}

/// A declared namespace and everything nested in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceNode {
    pub name: Symbol,
    pub kind: NamespaceKind,
    /// Fully qualified name of the superclass of a class.
    pub superclass: Option<Symbol>,
    /// Fully qualified names of included mixins.
    pub includes: Vec<Symbol>,
    /// Instance variables in slot order.
    pub ivars: Vec<Symbol>,
    pub children: Vec<NamespaceNode>,
}

impl NamespaceNode {
    pub fn new(kind: NamespaceKind, name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            kind,
            superclass: None,
            includes: Vec::new(),
            ivars: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_superclass(mut self, superclass: impl Into<Symbol>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    #[must_use]
    pub fn with_include(mut self, mixin: impl Into<Symbol>) -> Self {
        self.includes.push(mixin.into());
        self
    }

    #[must_use]
    pub fn with_ivars<I, S>(mut self, ivars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.ivars.extend(ivars.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

/// One node of a pre-order walk over a [`NamespaceTree`].
#[derive(Clone, Copy, Debug)]
pub struct NamespaceEntry<'a> {
    pub path: &'a str,
    /// `None` for namespaces defined directly in the root.
    pub parent: Option<&'a str>,
    pub node: &'a NamespaceNode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceTree {
    roots: Vec<NamespaceNode>,
    paths: Vec<String>,
}

impl NamespaceTree {
    pub fn new(roots: Vec<NamespaceNode>) -> Self {
        let mut paths = Vec::new();
        fn collect(node: &NamespaceNode, parent: Option<&str>, paths: &mut Vec<String>) {
            let path = match parent {
                Some(parent) => format!("{parent}::{}", node.name),
                None => node.name.to_string(),
            };
            paths.push(path.clone());
            for child in &node.children {
                collect(child, Some(&path), paths);
            }
        }
        for root in &roots {
            collect(root, None, &mut paths);
        }
        Self { roots, paths }
    }

    pub fn roots(&self) -> &[NamespaceNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Parents before children, siblings in declaration order.
    pub fn walk(&self) -> Vec<NamespaceEntry<'_>> {
        fn visit<'a>(
            node: &'a NamespaceNode,
            parent: Option<&'a str>,
            paths: &mut core::slice::Iter<'a, String>,
            out: &mut Vec<NamespaceEntry<'a>>,
        ) {
            let Some(path) = paths.next() else {
                return;
            };
            out.push(NamespaceEntry {
                path,
                parent,
                node,
            });
            for child in &node.children {
                visit(child, Some(path), paths, out);
            }
        }
        let mut out = Vec::with_capacity(self.paths.len());
        let mut paths = self.paths.iter();
        for root in &self.roots {
            visit(root, None, &mut paths, &mut out);
        }
        out
    }
}

/// A checker for nominal hierarchies described by a namespace tree. Standard
/// classes are related only through `Std::Object` and `Std::Bool`.
#[derive(Clone, Debug, Default)]
pub struct NominalChecker {
    tree: NamespaceTree,
    parents: IndexMap<Symbol, Vec<Symbol>>,
}

impl NominalChecker {
    pub fn new(tree: NamespaceTree) -> Self {
        let mut parents: IndexMap<Symbol, Vec<Symbol>> = IndexMap::default();
        for entry in tree.walk() {
            let direct = parents.entry(Symbol::from(entry.path)).or_default();
            direct.extend(entry.node.superclass.iter().cloned());
            direct.extend(entry.node.includes.iter().cloned());
        }
        Self { tree, parents }
    }

    fn is_named_subtype(&self, sub: &Symbol, sup: &Symbol) -> bool {
        if sub == sup || sup.as_str() == StdType::Object.name() {
            return true;
        }
        if sup.as_str() == StdType::Bool.name()
            && matches!(
                StdType::from_name(sub),
                Some(StdType::True | StdType::False)
            )
        {
            return true;
        }
        let mut pending = vec![sub];
        let mut seen = Vec::new();
        while let Some(current) = pending.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(direct) = self.parents.get(current) {
                if direct.contains(sup) {
                    return true;
                }
                pending.extend(direct.iter());
            }
        }
        false
    }
}

impl Checker for NominalChecker {
    fn is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        if sub == sup {
            return true;
        }
        match (sub, sup) {
            (Type::Never, _) => true,
            (Type::Untyped, _) | (_, Type::Untyped) => false,
            (Type::Union(elements), _) => elements.iter().all(|e| self.is_subtype(e, sup)),
            (Type::Nilable(inner), _) => {
                self.is_subtype(inner, sup) && self.is_subtype(&Type::std(StdType::Nil), sup)
            }
            (_, Type::Union(elements)) => elements.iter().any(|e| self.is_subtype(sub, e)),
            (_, Type::Nilable(inner)) => {
                self.is_subtype(sub, inner) || self.is_subtype(sub, &Type::std(StdType::Nil))
            }
            (Type::Named(a), Type::Named(b)) => self.is_named_subtype(a, b),
            _ => false,
        }
    }

    fn namespaces(&self) -> &NamespaceTree {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> NamespaceTree {
        NamespaceTree::new(vec![
            NamespaceNode::new(NamespaceKind::Module, "Shapes")
                .with_child(NamespaceNode::new(NamespaceKind::Class, "Shape").with_ivars(["name"]))
                .with_child(
                    NamespaceNode::new(NamespaceKind::Class, "Circle")
                        .with_superclass("Shapes::Shape")
                        .with_include("Drawable"),
                ),
            NamespaceNode::new(NamespaceKind::Mixin, "Drawable"),
        ])
    }

    #[test]
    fn test_walk_is_preorder_with_paths() {
        let tree = tree();
        let walked: Vec<_> = tree
            .walk()
            .into_iter()
            .map(|entry| (entry.path, entry.parent))
            .collect();
        assert_eq!(
            walked,
            [
                ("Shapes", None),
                ("Shapes::Shape", Some("Shapes")),
                ("Shapes::Circle", Some("Shapes")),
                ("Drawable", None),
            ]
        );
    }

    #[test]
    fn test_nominal_subtyping() {
        let checker = NominalChecker::new(tree());
        let circle = Type::named("Shapes::Circle");
        assert!(checker.is_subtype(&circle, &Type::named("Shapes::Shape")));
        assert!(checker.is_subtype(&circle, &Type::named("Drawable")));
        assert!(!checker.is_subtype(&Type::named("Shapes::Shape"), &circle));
        assert!(checker.is_subtype(&Type::Never, &circle));
        assert!(!checker.is_subtype(&Type::Untyped, &Type::std(StdType::Int)));
        assert!(checker.is_subtype(&Type::std(StdType::True), &Type::std(StdType::Bool)));
        assert!(!checker.is_subtype(&Type::std(StdType::Int8), &Type::std(StdType::Int)));
    }

    #[test]
    fn test_nilable_and_union() {
        let checker = NominalChecker::default();
        let int = Type::std(StdType::Int);
        let nilable_int = int.clone().nilable();
        assert!(checker.is_subtype(&int, &nilable_int));
        assert!(!checker.is_subtype(&nilable_int, &int));
        let union = Type::Union(vec![int.clone(), Type::std(StdType::Float)]);
        assert!(checker.is_subtype(&int, &union));
        assert!(!checker.is_subtype(&union, &int));
    }
}
