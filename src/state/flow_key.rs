use std::fmt;
use std::hash::{Hash, Hasher};

/// Anything that identifies one side of a TCP connection, typically an
/// address and port.
pub trait Endpoint: Clone + Ord + Hash + fmt::Display {}

impl<T: Clone + Ord + Hash + fmt::Display> Endpoint for T {}

#[derive(Debug, Clone, Eq)]
pub struct FlowKey<E> {
    pub x: E,
    pub y: E,
}

impl<E: Endpoint> FlowKey<E> {
    /// Builds the key for a fragment travelling `src -> dst`. The flag is
    /// true when `src` took the `x` role.
    pub fn canonical(src: &E, dst: &E) -> (Self, bool) {
        if src <= dst {
            (
                Self {
                    x: src.clone(),
                    y: dst.clone(),
                },
                true,
            )
        } else {
            (
                Self {
                    x: dst.clone(),
                    y: src.clone(),
                },
                false,
            )
        }
    }
}

impl<E: PartialEq> PartialEq for FlowKey<E> {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl<E: Hash> Hash for FlowKey<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x.hash(state);
        self.y.hash(state);
    }
}

impl<E: fmt::Display> fmt::Display for FlowKey<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.x, self.y)
    }
}
