//! Floor-price resolution.
//!
//! The host's price-floors module attaches a rule table to each bid request.
//! Rules are keyed by the schema fields joined with the delimiter, e.g.
//! `banner|300x250`, and any field may be the wildcard `*`. Resolution picks
//! the most specific matching rule: fewer wildcards win, and on a tie the
//! rule that pins the earlier schema fields wins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bidder::types::{BidRequest, MediaType};
use crate::constants::DEFAULT_CURRENCY;
use crate::sizes::Size;

const WILDCARD: &str = "*";

fn default_delimiter() -> String {
    "|".to_string()
}

fn default_fields() -> Vec<FloorField> {
    vec![FloorField::MediaType, FloorField::Size]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FloorField {
    MediaType,
    Size,
    AdUnitCode,
    Domain,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorSchema {
    #[serde(default = "default_fields")]
    pub fields: Vec<FloorField>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for FloorSchema {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            delimiter: default_delimiter(),
        }
    }
}

/// Floor rules attached to a bid request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorData {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub schema: FloorSchema,
    #[serde(default)]
    pub values: HashMap<String, f64>,
    /// Used when no rule matches.
    #[serde(default)]
    pub default: Option<f64>,
    /// Lower bound applied to whatever rule matched.
    #[serde(default)]
    pub floor_min: Option<f64>,
    /// Domain of the page, used by the `domain` schema field.
    #[serde(default)]
    pub domain: Option<String>,
}

/// What an adapter asks the floor module for. `None` means "any" (`*`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FloorQuery<'a> {
    pub media_type: Option<MediaType>,
    pub size: Option<Size>,
    pub currency: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Floor {
    pub value: f64,
    pub currency: String,
}

impl FloorData {
    fn field_value(&self, field: FloorField, bid: &BidRequest, query: &FloorQuery<'_>) -> String {
        match field {
            FloorField::MediaType => query
                .media_type
                .map_or_else(|| WILDCARD.to_string(), |m| m.as_str().to_string()),
            FloorField::Size => query
                .size
                .map_or_else(|| WILDCARD.to_string(), |s| s.to_string()),
            FloorField::AdUnitCode => bid.ad_unit_code.clone(),
            FloorField::Domain => self
                .domain
                .clone()
                .unwrap_or_else(|| WILDCARD.to_string()),
            FloorField::Unsupported => WILDCARD.to_string(),
        }
    }

    /// Most specific rule matching `values`.
    ///
    /// Fewer wildcards win; on a tie, the rule whose wildcards sit in later
    /// fields wins. Cost is linear in the rule table, whatever the schema
    /// width.
    fn best_match(&self, values: &[String]) -> Option<f64> {
        let mut best: Option<((usize, Vec<bool>), &str, f64)> = None;
        for (key, value) in &self.values {
            let parts: Vec<&str> = key.split(self.schema.delimiter.as_str()).collect();
            if parts.len() != values.len() {
                continue;
            }
            let mut wildcards = Vec::with_capacity(parts.len());
            let matches = parts.iter().zip(values).all(|(part, field)| {
                let is_wildcard = *part == WILDCARD;
                wildcards.push(is_wildcard);
                is_wildcard || part.eq_ignore_ascii_case(field)
            });
            if !matches {
                continue;
            }
            let rank = (wildcards.iter().filter(|w| **w).count(), wildcards);
            let better = best.as_ref().is_none_or(|(best_rank, best_key, _)| {
                rank.cmp(best_rank)
                    .then_with(|| key.as_str().cmp(best_key))
                    .is_lt()
            });
            if better {
                best = Some((rank, key.as_str(), *value));
            }
        }
        best.map(|(_, _, value)| value)
    }
}

/// Resolve the floor for `bid` from its attached floor data.
#[must_use]
pub fn get_floor(bid: &BidRequest, query: &FloorQuery<'_>) -> Option<Floor> {
    let data = bid.floors.as_ref()?;
    let currency = data
        .currency
        .clone()
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    if let Some(requested) = query.currency {
        if !requested.eq_ignore_ascii_case(&currency) {
            log::debug!(
                "floors: bid {} requested {requested} but rules are in {currency}; no conversion available",
                bid.bid_id
            );
            return None;
        }
    }

    let values: Vec<String> = data
        .schema
        .fields
        .iter()
        .map(|field| data.field_value(*field, bid, query))
        .collect();

    let matched = data.best_match(&values).or(data.default)?;

    let value = data.floor_min.map_or(matched, |min| matched.max(min));
    (value.is_finite() && value > 0.0).then_some(Floor { value, currency })
}

/// Resolve a floor from attached rules, falling back to a bidder param floor.
#[must_use]
pub fn resolve_floor(
    bid: &BidRequest,
    query: &FloorQuery<'_>,
    param_floor: Option<f64>,
) -> Option<Floor> {
    get_floor(bid, query).or_else(|| {
        param_floor
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|value| Floor {
                value,
                currency: query.currency.unwrap_or(DEFAULT_CURRENCY).to_string(),
            })
    })
}

/// Lowest floor across `sizes` for one media type.
#[must_use]
pub fn min_floor_across_sizes(
    bid: &BidRequest,
    media_type: MediaType,
    sizes: &[Size],
    param_floor: Option<f64>,
) -> Option<Floor> {
    let mut floors: Vec<Floor> = sizes
        .iter()
        .filter_map(|size| {
            resolve_floor(
                bid,
                &FloorQuery {
                    media_type: Some(media_type),
                    size: Some(*size),
                    currency: None,
                },
                param_floor,
            )
        })
        .collect();

    if floors.is_empty() {
        return resolve_floor(
            bid,
            &FloorQuery {
                media_type: Some(media_type),
                ..FloorQuery::default()
            },
            param_floor,
        );
    }

    floors.sort_by(|a, b| a.value.total_cmp(&b.value));
    floors.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::banner_bid;
    use serde_json::json;

    fn bid_with_floors(floors: serde_json::Value) -> BidRequest {
        let mut bid = banner_bid("bid-1", &[[300, 250], [728, 90]]);
        bid.floors = Some(serde_json::from_value(floors).expect("should parse floors"));
        bid
    }

    fn query(media_type: MediaType, w: u32, h: u32) -> FloorQuery<'static> {
        FloorQuery {
            media_type: Some(media_type),
            size: Some(Size::new(w, h)),
            currency: None,
        }
    }

    #[test]
    fn exact_rule_wins() {
        let bid = bid_with_floors(json!({
            "currency": "EUR",
            "values": { "banner|300x250": 1.5, "banner|*": 0.8, "*|*": 0.2 }
        }));
        let floor = get_floor(&bid, &query(MediaType::Banner, 300, 250)).expect("should match");
        assert_eq!(
            floor,
            Floor {
                value: 1.5,
                currency: "EUR".to_string()
            }
        );
    }

    #[test]
    fn earlier_field_is_more_specific_on_tie() {
        let bid = bid_with_floors(json!({
            "values": { "banner|*": 0.8, "*|728x90": 0.6 }
        }));
        let floor = get_floor(&bid, &query(MediaType::Banner, 728, 90)).expect("should match");
        assert!((floor.value - 0.8).abs() < f64::EPSILON);
        assert_eq!(floor.currency, "USD");
    }

    #[test]
    fn default_and_floor_min_apply() {
        let bid = bid_with_floors(json!({
            "values": { "video|*": 3.0 },
            "default": 0.1,
            "floorMin": 0.25
        }));
        let floor = get_floor(&bid, &query(MediaType::Banner, 300, 250)).expect("should default");
        assert!((floor.value - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn keys_match_case_insensitively() {
        let bid = bid_with_floors(json!({
            "values": { "Banner|300X250": 2.0 }
        }));
        let floor = get_floor(&bid, &query(MediaType::Banner, 300, 250)).expect("should match");
        assert!((floor.value - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn currency_mismatch_yields_none() {
        let bid = bid_with_floors(json!({ "currency": "EUR", "default": 1.0 }));
        let q = FloorQuery {
            currency: Some("USD"),
            ..FloorQuery::default()
        };
        assert!(get_floor(&bid, &q).is_none());
    }

    #[test]
    fn ad_unit_code_schema_field() {
        let bid = bid_with_floors(json!({
            "schema": { "fields": ["adUnitCode", "mediaType"], "delimiter": "/" },
            "values": { "div-top/banner": 4.0, "*/banner": 1.0 }
        }));
        let floor = get_floor(&bid, &query(MediaType::Banner, 300, 250)).expect("should match");
        assert!((floor.value - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn resolve_falls_back_to_param_floor() {
        let bid = banner_bid("bid-1", &[[300, 250]]);
        let floor = resolve_floor(&bid, &query(MediaType::Banner, 300, 250), Some(0.75))
            .expect("should use param floor");
        assert!((floor.value - 0.75).abs() < f64::EPSILON);
        assert!(resolve_floor(&bid, &FloorQuery::default(), Some(0.0)).is_none());
        assert!(resolve_floor(&bid, &FloorQuery::default(), None).is_none());
    }

    #[test]
    fn min_floor_across_sizes_picks_lowest() {
        let bid = bid_with_floors(json!({
            "values": { "banner|300x250": 1.2, "banner|728x90": 0.9 }
        }));
        let floor = min_floor_across_sizes(
            &bid,
            MediaType::Banner,
            &[Size::new(300, 250), Size::new(728, 90)],
            None,
        )
        .expect("should resolve");
        assert!((floor.value - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn wide_schema_resolves_without_overflow() {
        let bid = bid_with_floors(json!({
            "schema": { "fields": vec!["gptSlot"; 32] },
            "values": { "banner|300x250": 9.0 },
            "default": 1.0
        }));
        let floor = get_floor(&bid, &FloorQuery::default()).expect("should fall back to default");
        assert!((floor.value - 1.0).abs() < f64::EPSILON);

        let all_wildcards = vec![WILDCARD; 40].join("|");
        let bid = bid_with_floors(json!({
            "schema": { "fields": vec!["mediaType"; 40] },
            "values": { all_wildcards: 2.5 }
        }));
        let floor = get_floor(&bid, &query(MediaType::Banner, 300, 250)).expect("should match");
        assert!((floor.value - 2.5).abs() < f64::EPSILON);
    }
}
