//! Local filtering of title search results.
//!
//! Upstream title search is fuzzy and returns unrelated movies; results are
//! narrowed to items whose title contains the query and whose year is within
//! one of the requested year.

use serde_json::Value;

const YEAR_TOLERANCE: u64 = 1;

pub fn filter_by_title_and_year(items: Vec<Value>, query: &str, year: Option<i64>) -> Vec<Value> {
    let needle = query.to_lowercase();
    items
        .into_iter()
        .filter(|item| matches_title(item, &needle) && matches_year(item, year))
        .collect()
}

fn matches_title(item: &Value, needle: &str) -> bool {
    movie_name(item).is_some_and(|name| name.to_lowercase().contains(needle))
}

fn matches_year(item: &Value, year: Option<i64>) -> bool {
    let Some(wanted) = year else {
        return true;
    };

    movie_year(item).is_some_and(|found| found.abs_diff(wanted) <= YEAR_TOLERANCE)
}

fn movie_name(item: &Value) -> Option<&str> {
    item.pointer("/attributes/movie_name")
        .and_then(Value::as_str)
        .or_else(|| {
            item.pointer("/attributes/feature_details/movie_name")
                .and_then(Value::as_str)
        })
}

fn movie_year(item: &Value) -> Option<i64> {
    item.pointer("/attributes/year")
        .and_then(year_value)
        .or_else(|| {
            item.pointer("/attributes/feature_details/year")
                .and_then(year_value)
        })
}

fn year_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str, year: i64) -> Value {
        json!({ "id": format!("{name}-{year}"), "attributes": { "movie_name": name, "year": year } })
    }

    fn ids(items: &[Value]) -> Vec<&str> {
        items.iter().filter_map(|item| item["id"].as_str()).collect()
    }

    #[test]
    fn keeps_titles_within_one_year() {
        let items = vec![
            item("Inception", 2010),
            item("Inception 2", 2008),
            item("Inception", 2012),
            item("Inception", 2011),
            item("Inception", 2006),
            item("Interstellar", 2010),
        ];

        let kept = filter_by_title_and_year(items, "Inception", Some(2010));
        assert_eq!(ids(&kept), vec!["Inception-2010", "Inception-2011"]);
    }

    #[test]
    fn tolerance_is_inclusive_on_both_sides() {
        let items = vec![item("Inception", 2009), item("Inception 2", 2011)];
        let kept = filter_by_title_and_year(items, "Inception", Some(2010));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn title_match_ignores_case() {
        let items = vec![item("THE MATRIX Reloaded", 2003), item("Matrix", 1999)];
        let kept = filter_by_title_and_year(items, "the matrix", None);
        assert_eq!(ids(&kept), vec!["THE MATRIX Reloaded-2003"]);
    }

    #[test]
    fn reads_feature_details_and_string_years() {
        let items = vec![
            json!({ "id": "a", "attributes": { "feature_details": { "movie_name": "Alien", "year": 1979 } } }),
            json!({ "id": "b", "attributes": { "movie_name": "Aliens", "year": "1986" } }),
            json!({ "id": "c", "attributes": { "movie_name": "Alien" } }),
            json!({ "id": "d" }),
        ];

        let kept = filter_by_title_and_year(items.clone(), "alien", Some(1980));
        assert_eq!(ids(&kept), vec!["a"]);

        let kept = filter_by_title_and_year(items, "alien", None);
        assert_eq!(ids(&kept), vec!["a", "b", "c"]);
    }

    #[test]
    fn extreme_years_do_not_overflow() {
        let items = vec![
            item("Inception", i64::MAX),
            item("Inception", i64::MIN),
            item("Inception", 2010),
        ];

        let lowest = format!("Inception-{}", i64::MIN);
        let kept = filter_by_title_and_year(items.clone(), "Inception", Some(i64::MIN));
        assert_eq!(ids(&kept), vec![lowest.as_str()]);

        let highest = format!("Inception-{}", i64::MAX);
        let kept = filter_by_title_and_year(items, "Inception", Some(i64::MAX));
        assert_eq!(ids(&kept), vec![highest.as_str()]);
    }
}
