use std::fmt;
use std::str::FromStr;

/// Placement policy of a pool, selecting which free region serves an allocation request.
///
/// The policy is fixed when the pool is opened.
///
/// # Examples
///
/// ```
/// use mem_pool::Policy;
///
/// let policy: Policy = "best-fit".parse().unwrap();
/// assert_eq!(policy, Policy::BestFit);
/// assert_eq!(policy.to_string(), "best-fit");
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "first-fit and best-fit are the complete set of placement policies"
)]
pub enum Policy {
    /// Use the first free region in arena order that is large enough. This is the default.
    #[default]
    FirstFit,

    /// Use the smallest free region that is large enough. Among equally sized candidates,
    /// the one at the lowest arena offset wins.
    BestFit,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstFit => f.write_str("first-fit"),
            Self::BestFit => f.write_str("best-fit"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-fit" | "first_fit" | "firstfit" => Ok(Self::FirstFit),
            "best-fit" | "best_fit" | "bestfit" => Ok(Self::BestFit),
            _ => Err(format!(
                "Invalid placement policy: '{s}'. Valid options are: first-fit, best-fit"
            )),
        }
    }
}
