/// An optional summary field after decoding.
///
/// `Malformed` keeps the field's JSON path so the caller can report it; rendering treats
/// it like `Absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Present(T),
    Absent,
    Malformed(String),
}

impl<T> Field<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Self::Present(v) => Some(v),
            Self::Absent | Self::Malformed(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// First present value of `self`, then `other`.
    pub fn or(self, other: Field<T>) -> Field<T> {
        match self {
            Self::Present(_) => self,
            Self::Absent | Self::Malformed(_) => match other {
                Self::Present(_) => other,
                _ => self,
            },
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Present(v) => Field::Present(f(v)),
            Self::Absent => Field::Absent,
            Self::Malformed(path) => Field::Malformed(path),
        }
    }
}

impl<T: Copy> Field<T> {
    pub fn value(&self) -> Option<T> {
        self.present().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_prefers_the_first_present_value() {
        assert_eq!(Field::Present(1).or(Field::Present(2)), Field::Present(1));
        assert_eq!(Field::Absent.or(Field::Present(2)), Field::Present(2));
        assert_eq!(
            Field::<i32>::Malformed("a".to_string()).or(Field::Absent),
            Field::Malformed("a".to_string())
        );
    }

    #[test]
    fn malformed_is_not_present() {
        let f: Field<f64> = Field::Malformed("metrics.vus.max".to_string());
        assert_eq!(f.value(), None);
        assert!(!f.is_present());
    }
}
