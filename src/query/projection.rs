/// Result-shape transformation applied to a query.
///
/// Every backend supports a subset; an unsupported projection fails fast with
/// a clear error rather than silently returning entities.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Number of matching records
    Count,
    /// Number of distinct values of one property among the matches
    CountDistinct(String),
    /// Identifiers of the matching records
    Id,
    /// Values of one property of the matching records
    Property(String),
    Min(String),
    Max(String),
    Sum(String),
    Avg(String),
}

impl Projection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountDistinct(_) => "countDistinct",
            Self::Id => "id",
            Self::Property(_) => "property",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Sum(_) => "sum",
            Self::Avg(_) => "avg",
        }
    }

    /// The property the projection reads, if any
    pub fn property_name(&self) -> Option<&str> {
        match self {
            Self::CountDistinct(p)
            | Self::Property(p)
            | Self::Min(p)
            | Self::Max(p)
            | Self::Sum(p)
            | Self::Avg(p) => Some(p),
            Self::Count | Self::Id => None,
        }
    }
}

/// Sort direction for an order clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One order-by clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}
