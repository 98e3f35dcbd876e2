///
/// ForeignKeyModel
///
/// Dependent-side relationship metadata: the ordered dependent properties
/// whose values must equal the principal entity's primary key.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForeignKeyModel {
    name: &'static str,
    properties: Vec<usize>,
    principal: &'static str,
}

impl ForeignKeyModel {
    pub(crate) const fn new(name: &'static str, properties: Vec<usize>, principal: &'static str) -> Self {
        Self {
            name,
            properties,
            principal,
        }
    }

    /// Relationship name; also the navigation name passed to native objects.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Dense indices of the dependent properties, in principal-key order.
    #[must_use]
    pub fn properties(&self) -> &[usize] {
        &self.properties
    }

    /// Entity type name of the principal end.
    #[must_use]
    pub const fn principal(&self) -> &'static str {
        self.principal
    }
}
