//! Location keys shared by all extraction rules.
//!
//! A key has the form `COUNTRY-STATE-CITY`: country and state upper-cased,
//! the city title-cased with spaces replaced by underscores. Hyphens inside
//! country or state become underscores so the first two separators are
//! unambiguous. The state may be empty (`FR--Velizy-Villacoublay`). Keys are what the store filters on;
//! [`display_location`] turns one back into something readable.

fn clean_region(region: &str) -> String {
    region.trim().to_uppercase().replace('-', "_")
}

fn clean_city(city: &str) -> String {
    city.split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join("_")
}

/// Upper-cases the first letter of every alphanumeric run, lower-cases the rest.
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut at_start = true;
    for c in word.chars() {
        if c.is_alphanumeric() {
            if at_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_start = false;
        } else {
            out.push(c);
            at_start = true;
        }
    }
    out
}

pub fn normalize_location(
    country: Option<&str>,
    state: Option<&str>,
    city: Option<&str>,
) -> Option<String> {
    let country = clean_region(country.unwrap_or_default());
    let state = clean_region(state.unwrap_or_default());
    let city = clean_city(city.unwrap_or_default());
    if country.is_empty() && state.is_empty() && city.is_empty() {
        return None;
    }
    Some(format!("{}-{}-{}", country, state, city))
}

pub fn display_location(key: Option<&str>) -> String {
    let key = match key {
        Some(key) if !key.is_empty() => key,
        _ => return "—".to_owned(),
    };
    let parts = key.splitn(3, '-').collect::<Vec<_>>();
    let [country, state, city] = parts.as_slice() else {
        return key.to_owned();
    };
    let city = city.replace('_', " ");
    let country = country.replace('_', "-");
    let state = state.replace('_', "-");
    if state.is_empty() {
        format!("{}, {}", city, country)
    } else {
        format!("{}, {}, {}", city, state, country)
    }
}

/// Normalizes free-text locations of the form `Country, State, City` or
/// `Country, City`, as printed on career detail pages.
pub fn normalize_free_text(raw: &str) -> Option<String> {
    let parts = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>();
    let country = *parts.first()?;
    match country.to_lowercase().as_str() {
        "united states" | "us" | "usa" | "united states of america" => normalize_location(
            Some("US"),
            parts.get(1).copied(),
            parts.get(2).copied(),
        ),
        _ if parts.len() >= 3 => normalize_location(Some(country), Some(parts[1]), Some(parts[2])),
        _ => normalize_location(Some(country), None, parts.get(1).copied()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_location() {
        assert_eq!(
            normalize_location(Some("us"), Some("ma"), Some("natick")).as_deref(),
            Some("US-MA-Natick")
        );
        assert_eq!(
            normalize_location(Some("USA"), Some("WA"), Some("  new   york city ")).as_deref(),
            Some("USA-WA-New_York_City")
        );
        assert_eq!(
            normalize_location(Some("FR"), None, Some("vélizy-villacoublay")).as_deref(),
            Some("FR--Vélizy-Villacoublay")
        );
        assert_eq!(normalize_location(None, Some(" "), None), None);
    }

    #[test]
    fn test_display_location() {
        assert_eq!(display_location(Some("US-MA-Natick")), "Natick, MA, US");
        assert_eq!(display_location(Some("FR--Paris")), "Paris, FR");
        assert_eq!(display_location(Some("FR--Vélizy-Villacoublay")), "Vélizy-Villacoublay, FR");
        assert_eq!(display_location(Some("Remote")), "Remote");
        assert_eq!(
            display_location(Some("GUINEA_BISSAU--Bissau")),
            "Bissau, GUINEA-BISSAU"
        );
        assert_eq!(display_location(None), "—");
    }

    #[test]
    fn test_normalize_free_text() {
        assert_eq!(
            normalize_free_text("United States, MA, Waltham").as_deref(),
            Some("US-MA-Waltham")
        );
        assert_eq!(
            normalize_free_text("France, Île-de-France, Paris").as_deref(),
            Some("FRANCE-ÎLE_DE_FRANCE-Paris")
        );
        assert_eq!(
            display_location(normalize_free_text("France, Île-de-France, Paris").as_deref()),
            "Paris, ÎLE-DE-FRANCE, FRANCE"
        );
        assert_eq!(normalize_free_text("Germany, Munich").as_deref(), Some("GERMANY--Munich"));
        assert_eq!(normalize_free_text(" , "), None);
    }
}
