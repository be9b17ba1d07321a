use std::fmt;

/// A scalar component of a [`QueryKey`].
///
/// Query keys are heterogeneous ordered tuples (`["posts", 1, "comments"]`),
/// so the key's own element type has to be an enum rather than a single
/// generic `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(u64), // bit pattern of an f64, so Scalar can implement Eq/Hash.
    Bool(bool),
}

impl Scalar {
    fn float_bits(value: f64) -> u64 {
        value.to_bits()
    }
}

impl Eq for Scalar {}

impl std::hash::Hash for Scalar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Scalar::Str(s) => s.hash(state),
            Scalar::Int(i) => i.hash(state),
            Scalar::Float(bits) => bits.hash(state),
            Scalar::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{s}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(Scalar::float_bits(value))
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(value: $t) -> Self {
                    Scalar::Int(value as i64)
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

/// Structural identity of a cache entry: an ordered, heterogeneous tuple of
/// scalars. Equality and hashing are element-wise; the [`Display`](fmt::Display)
/// form is the underscore-joined string used to derive persistence slot
/// names (`query_data_<keyStr>` / `query_time_<keyStr>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueryKey(Vec<Scalar>);

impl QueryKey {
    pub fn new(parts: impl IntoIterator<Item = Scalar>) -> Self {
        QueryKey(parts.into_iter().collect())
    }

    pub fn single(part: impl Into<Scalar>) -> Self {
        QueryKey(vec![part.into()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Scalar] {
        &self.0
    }

    pub fn push(&mut self, part: impl Into<Scalar>) {
        self.0.push(part.into());
    }

    pub fn with(mut self, part: impl Into<Scalar>) -> Self {
        self.push(part);
        self
    }

    /// Prefix relation: `self` matches `pattern` iff `len(self) >= len(pattern)`
    /// and `self[0..len(pattern)] == pattern`. An empty pattern matches every
    /// key.
    pub fn matches_prefix(&self, pattern: &QueryKey) -> bool {
        if pattern.0.len() > self.0.len() {
            return false;
        }
        self.0[..pattern.0.len()] == pattern.0[..]
    }

    /// The stable string form used to derive persistence slot names.
    pub fn as_str_key(&self) -> String {
        self.0
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_key())
    }
}

impl<const N: usize, T: Into<Scalar>> From<[T; N]> for QueryKey {
    fn from(value: [T; N]) -> Self {
        QueryKey(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for QueryKey {
    fn from(value: Vec<T>) -> Self {
        QueryKey(value.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pattern_matches_everything() {
        let key = QueryKey::from(["posts", "1"]);
        let empty = QueryKey::default();
        assert!(key.matches_prefix(&empty));
    }

    #[test]
    fn prefix_matching() {
        let posts = QueryKey::from(["posts"]);
        let post_1 = QueryKey::new([Scalar::from("posts"), Scalar::from(1_i64)]);
        let post_1_comments =
            QueryKey::new([Scalar::from("posts"), Scalar::from(1_i64), Scalar::from("comments")]);
        let users = QueryKey::from(["users"]);

        assert!(post_1.matches_prefix(&posts));
        assert!(post_1_comments.matches_prefix(&posts));
        assert!(!users.matches_prefix(&posts));
        assert!(!posts.matches_prefix(&post_1));
    }

    #[test]
    fn str_key_is_underscore_joined() {
        let key = QueryKey::new([Scalar::from("posts"), Scalar::from(1_i64)]);
        assert_eq!(key.as_str_key(), "posts_1");
    }

    #[test]
    fn equality_is_elementwise() {
        let a = QueryKey::new([Scalar::from("posts"), Scalar::from(1_i64)]);
        let b = QueryKey::new([Scalar::from("posts"), Scalar::from(1_i64)]);
        let c = QueryKey::new([Scalar::from("posts"), Scalar::from(2_i64)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
