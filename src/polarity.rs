use serde::Deserialize;

/// How a sensor is wired. Decides which raw level means "active".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    /// Contact closes when asserted; active while the input reads high.
    NormallyOpen,
    /// Contact opens when asserted; active while the input reads low.
    NormallyClosed,
}

impl Sense {
    /// Map a confirmed raw level (true = high) into the semantic active flag.
    pub fn is_active(self, level: bool) -> bool {
        level ^ (self == Sense::NormallyClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Sense::NormallyOpen, true => true)]
    #[test_case(Sense::NormallyOpen, false => false)]
    #[test_case(Sense::NormallyClosed, true => false)]
    #[test_case(Sense::NormallyClosed, false => true)]
    fn maps_level_to_active(sense: Sense, level: bool) -> bool {
        sense.is_active(level)
    }

    #[test]
    fn parses_from_yaml() {
        let sense: Sense = serde_yaml::from_str("normally_closed").unwrap();
        assert_eq!(sense, Sense::NormallyClosed);
        let sense: Sense = serde_yaml::from_str("normally_open").unwrap();
        assert_eq!(sense, Sense::NormallyOpen);
    }
}
