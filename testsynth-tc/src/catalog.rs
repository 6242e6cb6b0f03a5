// SPDX-License-Identifier: Apache-2.0

//! The catalog of invocable members the embedder exposes to the search.
//!
//! Introspection over the program under test happens outside this crate; the
//! result lands here as plain data: classes (with single inheritance), enums,
//! fields, and members (constructors, methods, free functions). Ids are dense
//! indices into the catalog that created them, so lookups by id index
//! directly and panic on foreign ids; validation uses the checked getters.

use std::fmt;

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub usize);

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<ClassId>,
}

#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub name: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub owner: ClassId,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Constructor(ClassId),
    Method { class: ClassId, is_static: bool },
    Function,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<Type>,
    /// `None` for void members.
    pub ret: Option<Type>,
}

impl MemberInfo {
    pub fn owner(&self) -> Option<ClassId> {
        match self.kind {
            MemberKind::Constructor(c) => Some(c),
            MemberKind::Method { class, .. } => Some(class),
            MemberKind::Function => None,
        }
    }

    pub fn needs_receiver(&self) -> bool {
        matches!(self.kind, MemberKind::Method { is_static: false, .. })
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, MemberKind::Constructor(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    classes: Vec<ClassInfo>,
    enums: Vec<EnumInfo>,
    fields: Vec<FieldInfo>,
    members: Vec<MemberInfo>,
}

impl Catalog {
    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0]
    }

    pub fn enum_def(&self, id: EnumId) -> &EnumInfo {
        &self.enums[id.0]
    }

    pub fn field(&self, id: FieldId) -> &FieldInfo {
        &self.fields[id.0]
    }

    pub fn member(&self, id: MemberId) -> &MemberInfo {
        &self.members[id.0]
    }

    pub fn get_class(&self, id: ClassId) -> Option<&ClassInfo> {
        self.classes.get(id.0)
    }

    pub fn get_enum(&self, id: EnumId) -> Option<&EnumInfo> {
        self.enums.get(id.0)
    }

    pub fn get_field(&self, id: FieldId) -> Option<&FieldInfo> {
        self.fields.get(id.0)
    }

    pub fn get_member(&self, id: MemberId) -> Option<&MemberInfo> {
        self.members.get(id.0)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> {
        (0..self.members.len()).map(MemberId)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> {
        (0..self.fields.len()).map(FieldId)
    }

    /// Walks the parent chain; a class is its own subclass.
    pub fn is_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut cursor = Some(sub);
        while let Some(c) = cursor {
            if c == sup {
                return true;
            }
            cursor = self.class(c).parent;
        }
        false
    }

    /// Whether a value of `src` may stand wherever `dst` is expected.
    /// Classes are covariant along the parent chain; arrays are invariant.
    pub fn is_assignable(&self, src: &Type, dst: &Type) -> bool {
        match (src, dst) {
            (Type::Class(a), Type::Class(b)) => self.is_subclass(*a, *b),
            (a, b) => a == b && !a.is_void(),
        }
    }

    /// Fields readable on an instance of `class`, including inherited ones.
    pub fn fields_of(&self, class: ClassId) -> Vec<FieldId> {
        let mut out = Vec::new();
        for (i, f) in self.fields.iter().enumerate() {
            if self.is_subclass(class, f.owner) {
                out.push(FieldId(i));
            }
        }
        out
    }

    pub fn class_has_field(&self, class: ClassId, field: FieldId) -> bool {
        match self.get_field(field) {
            Some(f) => self.is_subclass(class, f.owner),
            None => false,
        }
    }

    pub fn constructors_of(&self, class: ClassId) -> Vec<MemberId> {
        let mut out = Vec::new();
        for (i, m) in self.members.iter().enumerate() {
            if m.kind == MemberKind::Constructor(class) {
                out.push(MemberId(i));
            }
        }
        out
    }

    /// Instance methods invocable on `class`, i.e. declared on it or an
    /// ancestor.
    pub fn methods_on(&self, class: ClassId) -> Vec<MemberId> {
        let mut out = Vec::new();
        for (i, m) in self.members.iter().enumerate() {
            if let MemberKind::Method {
                class: owner,
                is_static: false,
            } = m.kind
            {
                if self.is_subclass(class, owner) {
                    out.push(MemberId(i));
                }
            }
        }
        out
    }

    /// First member with the given name. Sample registries keep names unique,
    /// which makes this the convenient handle in tests and the driver.
    pub fn member_named(&self, name: &str) -> Option<MemberId> {
        self.members
            .iter()
            .position(|m| m.name == name)
            .map(MemberId)
    }

    pub fn field_named(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name == name).map(FieldId)
    }

    pub fn class_named(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(ClassId)
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "catalog[{} classes, {} enums, {} fields, {} members]",
            self.classes.len(),
            self.enums.len(),
            self.fields.len(),
            self.members.len()
        )
    }
}

/// Builds a `Catalog` incrementally; the embedder resets by building a new
/// one.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: Catalog,
}

impl CatalogBuilder {
    pub fn new() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn add_class(&mut self, name: &str, parent: Option<ClassId>) -> ClassId {
        if let Some(p) = parent {
            assert!(p.0 < self.catalog.classes.len(), "unknown parent class");
        }
        self.catalog.classes.push(ClassInfo {
            name: name.to_string(),
            parent,
        });
        ClassId(self.catalog.classes.len() - 1)
    }

    pub fn add_enum(&mut self, name: &str, variants: &[&str]) -> EnumId {
        assert!(!variants.is_empty(), "enum must have at least one variant");
        self.catalog.enums.push(EnumInfo {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        });
        EnumId(self.catalog.enums.len() - 1)
    }

    pub fn add_field(&mut self, owner: ClassId, name: &str, ty: Type) -> FieldId {
        self.catalog.fields.push(FieldInfo {
            name: name.to_string(),
            owner,
            ty,
        });
        FieldId(self.catalog.fields.len() - 1)
    }

    pub fn add_constructor(&mut self, class: ClassId, name: &str, params: Vec<Type>) -> MemberId {
        self.catalog.members.push(MemberInfo {
            name: name.to_string(),
            kind: MemberKind::Constructor(class),
            params,
            ret: Some(Type::Class(class)),
        });
        MemberId(self.catalog.members.len() - 1)
    }

    pub fn add_method(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<Type>,
        ret: Option<Type>,
    ) -> MemberId {
        self.catalog.members.push(MemberInfo {
            name: name.to_string(),
            kind: MemberKind::Method {
                class,
                is_static: false,
            },
            params,
            ret,
        });
        MemberId(self.catalog.members.len() - 1)
    }

    pub fn add_static_method(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<Type>,
        ret: Option<Type>,
    ) -> MemberId {
        self.catalog.members.push(MemberInfo {
            name: name.to_string(),
            kind: MemberKind::Method {
                class,
                is_static: true,
            },
            params,
            ret,
        });
        MemberId(self.catalog.members.len() - 1)
    }

    pub fn add_function(&mut self, name: &str, params: Vec<Type>, ret: Option<Type>) -> MemberId {
        self.catalog.members.push(MemberInfo {
            name: name.to_string(),
            kind: MemberKind::Function,
            params,
            ret,
        });
        MemberId(self.catalog.members.len() - 1)
    }

    pub fn build(self) -> Catalog {
        self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntKind;

    fn two_level_catalog() -> (Catalog, ClassId, ClassId) {
        let mut b = CatalogBuilder::new();
        let base = b.add_class("Base", None);
        let derived = b.add_class("Derived", Some(base));
        b.add_field(base, "count", Type::Int(IntKind::I32));
        b.add_method(base, "tick", vec![], None);
        b.add_constructor(derived, "Derived::new", vec![]);
        (b.build(), base, derived)
    }

    #[test]
    fn subclass_walks_parent_chain() {
        let (c, base, derived) = two_level_catalog();
        assert!(c.is_subclass(derived, base));
        assert!(c.is_subclass(base, base));
        assert!(!c.is_subclass(base, derived));
    }

    #[test]
    fn assignability_is_covariant_for_classes_only() {
        let (c, base, derived) = two_level_catalog();
        assert!(c.is_assignable(&Type::Class(derived), &Type::Class(base)));
        assert!(!c.is_assignable(&Type::Class(base), &Type::Class(derived)));
        let arr_b = Type::Array(Box::new(Type::Class(base)));
        let arr_d = Type::Array(Box::new(Type::Class(derived)));
        assert!(!c.is_assignable(&arr_d, &arr_b));
        assert!(!c.is_assignable(&Type::Void, &Type::Void));
    }

    #[test]
    fn inherited_members_are_visible_on_subclass() {
        let (c, _base, derived) = two_level_catalog();
        let tick = c.member_named("tick").unwrap();
        assert!(c.methods_on(derived).contains(&tick));
        let count = c.field_named("count").unwrap();
        assert!(c.class_has_field(derived, count));
    }

    #[test]
    fn constructor_return_type_is_its_class() {
        let (c, _, derived) = two_level_catalog();
        let ctor = c.constructors_of(derived)[0];
        assert_eq!(c.member(ctor).ret, Some(Type::Class(derived)));
        assert!(c.member(ctor).is_constructor());
    }
}
