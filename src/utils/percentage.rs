use std::{fmt::Display, ops::Deref, str::FromStr};

use anyhow::anyhow;

#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl Percentage {
    pub fn new_opt(value: f64) -> Option<Percentage> {
        if value < 0. || value.is_nan() {
            None
        } else {
            Some(Percentage(value))
        }
    }
}

impl FromStr for Percentage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches("%");
        let v = s.parse::<f64>()?;
        Percentage::new_opt(v).ok_or_else(|| anyhow!("Can't parse {s} into percentage"))
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Share of `whole` taken by `part`. An empty whole gives 0%.
pub fn seconds_share(part: u64, whole: u64) -> Percentage {
    if whole == 0 {
        return Percentage(0.);
    }
    Percentage(part as f64 / whole as f64 * 100.)
}

#[cfg(test)]
mod tests {
    use super::{seconds_share, Percentage};

    #[test]
    fn test_parse() {
        assert_eq!("5%".parse::<Percentage>().unwrap(), Percentage(5.));
        assert_eq!("0.5".parse::<Percentage>().unwrap(), Percentage(0.5));
        assert!("-1".parse::<Percentage>().is_err());
    }

    #[test]
    fn test_share() {
        assert_eq!(*seconds_share(25, 100), 25.);
        assert_eq!(*seconds_share(10, 0), 0.);
    }
}
