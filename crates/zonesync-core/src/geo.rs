//! Canonical geography table
//!
//! Continent ↔ country membership, looked up by the rule compiler and the
//! parser. There is exactly one table; callers receive it explicitly (usually
//! behind an `Arc`) instead of reaching for a global.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

const AFRICA: &[&str] = &[
    "AO", "BF", "BI", "BJ", "BW", "CD", "CF", "CG", "CI", "CM", "CV", "DJ", "DZ", "EG", "EH",
    "ER", "ET", "GA", "GH", "GM", "GN", "GQ", "GW", "KE", "KM", "LR", "LS", "LY", "MA", "MG",
    "ML", "MR", "MU", "MW", "MZ", "NA", "NE", "NG", "RE", "RW", "SC", "SD", "SH", "SL", "SN",
    "SO", "SS", "ST", "SZ", "TD", "TG", "TN", "TZ", "UG", "YT", "ZA", "ZM", "ZW",
];

const ANTARCTICA: &[&str] = &["AQ", "BV", "GS", "HM", "TF"];

const ASIA: &[&str] = &[
    "AE", "AF", "AM", "AZ", "BD", "BH", "BN", "BT", "CC", "CN", "CX", "CY", "GE", "HK", "ID",
    "IL", "IN", "IO", "IQ", "IR", "JO", "JP", "KG", "KH", "KP", "KR", "KW", "KZ", "LA", "LB",
    "LK", "MM", "MN", "MO", "MV", "MY", "NP", "OM", "PH", "PK", "PS", "QA", "SA", "SG", "SY",
    "TH", "TJ", "TL", "TM", "TR", "TW", "UZ", "VN", "YE",
];

const EUROPE: &[&str] = &[
    "AD", "AL", "AT", "AX", "BA", "BE", "BG", "BY", "CH", "CZ", "DE", "DK", "EE", "ES", "FI",
    "FO", "FR", "GB", "GG", "GI", "GR", "HR", "HU", "IE", "IM", "IS", "IT", "JE", "LI", "LT",
    "LU", "LV", "MC", "MD", "ME", "MK", "MT", "NL", "NO", "PL", "PT", "RO", "RS", "RU", "SE",
    "SI", "SJ", "SK", "SM", "UA", "VA",
];

const NORTH_AMERICA: &[&str] = &[
    "AG", "AI", "AW", "BB", "BL", "BM", "BQ", "BS", "BZ", "CA", "CR", "CU", "CW", "DM", "DO",
    "GD", "GL", "GP", "GT", "HN", "HT", "JM", "KN", "KY", "LC", "MF", "MQ", "MS", "MX", "NI",
    "PA", "PM", "PR", "SV", "SX", "TC", "TT", "US", "VC", "VG", "VI",
];

const OCEANIA: &[&str] = &[
    "AS", "AU", "CK", "FJ", "FM", "GU", "KI", "MH", "MP", "NC", "NF", "NR", "NU", "NZ", "PF",
    "PG", "PN", "PW", "SB", "TK", "TO", "TV", "UM", "VU", "WF", "WS",
];

const SOUTH_AMERICA: &[&str] = &[
    "AR", "BO", "BR", "CL", "CO", "EC", "FK", "GF", "GY", "PE", "PY", "SR", "UY", "VE",
];

/// A parsed geo code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeoCode {
    /// `EU`
    Continent(String),
    /// `EU-FR`
    Country { continent: String, country: String },
    /// `NA-US-CA`
    Subdivision {
        continent: String,
        country: String,
        subdivision: String,
    },
}

impl fmt::Display for GeoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoCode::Continent(c) => f.write_str(c),
            GeoCode::Country { continent, country } => write!(f, "{}-{}", continent, country),
            GeoCode::Subdivision {
                continent,
                country,
                subdivision,
            } => write!(f, "{}-{}-{}", continent, country, subdivision),
        }
    }
}

/// Immutable continent/country membership table
#[derive(Debug, Clone)]
pub struct GeoTable {
    countries: BTreeMap<String, BTreeSet<String>>,
    continent_of: HashMap<String, String>,
}

impl GeoTable {
    /// The ISO 3166 table used in production
    pub fn standard() -> Self {
        Self::from_entries([
            ("AF", AFRICA),
            ("AN", ANTARCTICA),
            ("AS", ASIA),
            ("EU", EUROPE),
            ("NA", NORTH_AMERICA),
            ("OC", OCEANIA),
            ("SA", SOUTH_AMERICA),
        ])
    }

    /// Build a table from `(continent, countries)` pairs
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let mut countries = BTreeMap::new();
        let mut continent_of = HashMap::new();
        for (continent, members) in entries {
            let set: BTreeSet<String> = members.iter().map(|c| c.to_string()).collect();
            for country in &set {
                continent_of.insert(country.clone(), continent.to_string());
            }
            countries.insert(continent.to_string(), set);
        }
        Self {
            countries,
            continent_of,
        }
    }

    /// Whether a continent code is known
    pub fn is_continent(&self, code: &str) -> bool {
        self.countries.contains_key(code)
    }

    /// Member countries of a continent
    pub fn countries(&self, continent: &str) -> Option<&BTreeSet<String>> {
        self.countries.get(continent)
    }

    /// Continent a country belongs to
    pub fn continent_of(&self, country: &str) -> Option<&str> {
        self.continent_of.get(country).map(String::as_str)
    }

    /// Parse and check a geo code against the table
    ///
    /// Returns `None` for malformed codes, unknown continents, and countries
    /// filed under the wrong continent.
    pub fn parse(&self, code: &str) -> Option<GeoCode> {
        let parts: Vec<&str> = code.split('-').collect();
        match parts.as_slice() {
            [continent] if self.is_continent(continent) => {
                Some(GeoCode::Continent(continent.to_string()))
            }
            [continent, country] if self.continent_of(country) == Some(*continent) => {
                Some(GeoCode::Country {
                    continent: continent.to_string(),
                    country: country.to_string(),
                })
            }
            [continent, country, subdivision]
                if self.continent_of(country) == Some(*continent) && !subdivision.is_empty() =>
            {
                Some(GeoCode::Subdivision {
                    continent: continent.to_string(),
                    country: country.to_string(),
                    subdivision: subdivision.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Full geo code (`EU-FR`) for a bare country code
    pub fn country_code(&self, country: &str) -> Option<String> {
        self.continent_of(country)
            .map(|continent| format!("{}-{}", continent, country))
    }
}

impl Default for GeoTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_country_on_two_continents() {
        let table = GeoTable::standard();
        let total: usize = ["AF", "AN", "AS", "EU", "NA", "OC", "SA"]
            .iter()
            .map(|c| table.countries(c).unwrap().len())
            .sum();
        assert_eq!(total, table.continent_of.len());
    }

    #[test]
    fn test_parse_codes() {
        let table = GeoTable::standard();
        assert_eq!(table.parse("EU"), Some(GeoCode::Continent("EU".into())));
        assert_eq!(
            table.parse("NA-US"),
            Some(GeoCode::Country {
                continent: "NA".into(),
                country: "US".into()
            })
        );
        assert!(matches!(
            table.parse("NA-CA-QC"),
            Some(GeoCode::Subdivision { .. })
        ));
        assert_eq!(table.parse("EU-US"), None);
        assert_eq!(table.parse("XX"), None);
    }

    #[test]
    fn test_country_code_lookup() {
        let table = GeoTable::standard();
        assert_eq!(table.country_code("FR").as_deref(), Some("EU-FR"));
        assert_eq!(table.country_code("JP").as_deref(), Some("AS-JP"));
        assert_eq!(table.country_code("ZZ"), None);
    }
}
