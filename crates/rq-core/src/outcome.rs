/// One round of rule evaluation output.
///
/// `Empty` means the round produced nothing; consumers of a result stream
/// discard it instead of forwarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome<T> {
    Value(T),
    Empty,
}

impl<T> Outcome<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Convert into an `Option`, mapping `Empty` to `None`.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Empty => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_value() {
        let o: Outcome<u32> = Outcome::Empty;
        assert!(o.is_empty());
        assert_eq!(o.into_value(), None);
    }

    #[test]
    fn value_converts_to_some() {
        let o = Outcome::Value(3);
        assert!(!o.is_empty());
        assert_eq!(o.into_value(), Some(3));
    }
}
