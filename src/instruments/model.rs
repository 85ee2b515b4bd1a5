//! Model tables and the lookups drivers share when picking one.

use super::session::Identity;

/// How a model recognises itself in a `*IDN?` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matcher {
    /// Any one must appear in the manufacturer field. Empty matches anyone.
    pub vendors: &'static [&'static str],
    /// Any one must appear in the model field.
    pub models: &'static [&'static str],
}

impl Matcher {
    pub fn matches(&self, identity: &Identity) -> bool {
        let manufacturer = identity.manufacturer.to_ascii_uppercase();
        let model = identity.model.to_ascii_uppercase();
        (self.vendors.is_empty() || self.vendors.iter().any(|v| manufacturer.contains(v)))
            && self.models.iter().any(|m| model.contains(m))
    }
}

pub trait ModelInfo: Sync + 'static {
    fn name(&self) -> &'static str;
    fn matcher(&self) -> &Matcher;
}

fn simplify(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// First table entry whose matcher accepts `identity`.
pub fn detect<M: ModelInfo>(table: &'static [M], identity: &Identity) -> Option<&'static M> {
    table.iter().find(|m| m.matcher().matches(identity))
}

/// Entry named `name`, ignoring case and punctuation (`"Keithley-2000"`
/// finds `"Keithley 2000"`).
pub fn by_name<M: ModelInfo>(table: &'static [M], name: &str) -> Option<&'static M> {
    let wanted = simplify(name);
    table.iter().find(|m| {
        simplify(m.name()) == wanted || m.matcher().models.iter().any(|t| simplify(t) == wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry(&'static str, Matcher);

    impl ModelInfo for Entry {
        fn name(&self) -> &'static str {
            self.0
        }
        fn matcher(&self) -> &Matcher {
            &self.1
        }
    }

    static TABLE: [Entry; 2] = [
        Entry(
            "Keithley 2000",
            Matcher {
                vendors: &["KEITHLEY"],
                models: &["2000"],
            },
        ),
        Entry(
            "HP 34401A",
            Matcher {
                vendors: &[],
                models: &["34401A"],
            },
        ),
    ];

    fn idn(s: &str) -> Identity {
        s.parse().unwrap()
    }

    #[test]
    fn detects_by_vendor_and_model() {
        let found = detect(&TABLE, &idn("KEITHLEY INSTRUMENTS,2000,1234567,1.0"));
        assert_eq!(found.map(|m| m.name()), Some("Keithley 2000"));
        assert!(detect(&TABLE, &idn("ACME,2000,1,1")).is_none());
        let hp = detect(&TABLE, &idn("HEWLETT-PACKARD,34401A,0,11-5-2"));
        assert_eq!(hp.map(|m| m.name()), Some("HP 34401A"));
    }

    #[test]
    fn names_ignore_case_and_punctuation() {
        assert!(by_name(&TABLE, "keithley-2000").is_some());
        assert!(by_name(&TABLE, "34401a").is_some());
        assert!(by_name(&TABLE, "Fluke 8846A").is_none());
    }
}
