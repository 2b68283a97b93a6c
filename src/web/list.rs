//! Want-list endpoints: resolve a pasted CSV list against the inventory,
//! export a list back to CSV, and bulk-apply a list (decrementing owned
//! quantities).
//!
//! The line format is `id,name,set_code,set_rarity,quantity`, split on
//! commas with no quoting. Matching walks exact printing -> partial
//! (same catalog id, matching set code or rarity) -> cheapest same-id row,
//! and requested quantities are capped at owned quantities.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::data::cards::{self, OwnedCard};
use crate::state::AppState;
use crate::web::auth::AuthUser;
use crate::web::error::{ApiError, db_error};

#[derive(Debug, Clone, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct WantLine {
    #[ts(type = "number")]
    pub catalog_id: i64,
    pub name: String,
    pub set_code: String,
    pub set_rarity: String,
    pub quantity: i32,
}

#[derive(Debug, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum LineOutcome {
    Matched,
    QuantityCapped,
    NotFound,
    Invalid,
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct LineReport {
    pub line: usize,
    pub outcome: LineOutcome,
    pub detail: String,
}

/// A want line resolved to a concrete inventory row.
#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct ResolvedEntry {
    /// Inventory row id, the handle `apply` operates on.
    pub card_id: i32,
    #[ts(type = "number")]
    pub catalog_id: i64,
    pub name: String,
    pub set_code: String,
    pub set_rarity: String,
    pub quantity: i32,
    pub market_price: f64,
}

/// Parse CSV text into numbered lines. Empty lines are skipped; malformed
/// lines come back as `Err` with a human-readable reason.
pub fn parse_want_list(csv: &str) -> Vec<(usize, Result<WantLine, String>)> {
    let mut out = Vec::new();
    for (idx, raw) in csv.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line_num = idx + 1;

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() != 5 {
            out.push((
                line_num,
                Err(format!("expected 5 fields, got {}", parts.len())),
            ));
            continue;
        }

        let Ok(catalog_id) = parts[0].parse::<i64>() else {
            out.push((line_num, Err(format!("invalid id \"{}\"", parts[0]))));
            continue;
        };
        let quantity = match parts[4].parse::<i32>() {
            Ok(q) if q >= 1 => q,
            _ => {
                out.push((line_num, Err(format!("invalid quantity \"{}\"", parts[4]))));
                continue;
            }
        };

        out.push((
            line_num,
            Ok(WantLine {
                catalog_id,
                name: parts[1].to_owned(),
                set_code: parts[2].to_owned(),
                set_rarity: parts[3].to_owned(),
                quantity,
            }),
        ));
    }
    out
}

fn cheapest<'a>(rows: &[&'a OwnedCard]) -> Option<&'a OwnedCard> {
    rows.iter()
        .copied()
        .min_by(|a, b| a.market_price.total_cmp(&b.market_price))
}

/// Match parsed lines against the inventory.
///
/// Exact printing (id + set code + rarity + name) wins; otherwise any row
/// with the same catalog id and a matching set code or rarity; otherwise
/// the cheapest same-id row. Quantities are capped at the owned count.
pub fn resolve_lines(
    lines: Vec<(usize, Result<WantLine, String>)>,
    inventory: &[OwnedCard],
) -> (Vec<ResolvedEntry>, Vec<LineReport>) {
    let mut entries: Vec<ResolvedEntry> = Vec::new();
    let mut report = Vec::new();

    for (line, parsed) in lines {
        let want = match parsed {
            Ok(want) => want,
            Err(reason) => {
                report.push(LineReport {
                    line,
                    outcome: LineOutcome::Invalid,
                    detail: format!("{reason} - skipped"),
                });
                continue;
            }
        };

        let exact = inventory.iter().find(|c| {
            c.catalog_id == want.catalog_id
                && c.set_code == want.set_code
                && c.set_rarity == want.set_rarity
                && c.name == want.name
        });

        let matched = match exact {
            Some(card) => card,
            None => {
                let same_id: Vec<&OwnedCard> = inventory
                    .iter()
                    .filter(|c| c.catalog_id == want.catalog_id)
                    .collect();
                let partial = same_id
                    .iter()
                    .copied()
                    .find(|c| c.set_code == want.set_code || c.set_rarity == want.set_rarity);
                let Some(card) = partial.or_else(|| cheapest(&same_id)) else {
                    report.push(LineReport {
                        line,
                        outcome: LineOutcome::NotFound,
                        detail: format!(
                            "\"{}\" (id {}) not in inventory",
                            want.name, want.catalog_id
                        ),
                    });
                    continue;
                };
                card
            }
        };

        let granted = want.quantity.min(matched.quantity);
        if granted < want.quantity {
            report.push(LineReport {
                line,
                outcome: LineOutcome::QuantityCapped,
                detail: format!(
                    "only {granted} of {} \"{}\" [{}] available",
                    want.quantity, matched.name, matched.set_code
                ),
            });
        } else {
            report.push(LineReport {
                line,
                outcome: LineOutcome::Matched,
                detail: format!(
                    "{granted}x \"{}\" [{}] {}",
                    matched.name, matched.set_code, matched.set_rarity
                ),
            });
        }

        // Merge repeated lines for the same row, still capped at owned.
        if let Some(existing) = entries.iter_mut().find(|e| e.card_id == matched.id) {
            existing.quantity = (existing.quantity + granted).min(matched.quantity);
        } else if granted > 0 {
            entries.push(ResolvedEntry {
                card_id: matched.id,
                catalog_id: matched.catalog_id,
                name: matched.name.clone(),
                set_code: matched.set_code.clone(),
                set_rarity: matched.set_rarity.clone(),
                quantity: granted,
                market_price: matched.market_price,
            });
        }
    }

    (entries, report)
}

/// Render entries in the canonical 5-field line format.
pub fn export_csv(entries: &[WantLine]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "{},{},{},{},{}",
                e.catalog_id, e.name, e.set_code, e.set_rarity, e.quantity
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct ResolveListRequest {
    pub csv: String,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ResolveListResponse {
    pub entries: Vec<ResolvedEntry>,
    pub report: Vec<LineReport>,
}

/// `POST /api/list/resolve`
pub async fn resolve_list(
    State(state): State<AppState>,
    Json(request): Json<ResolveListRequest>,
) -> Result<Json<ResolveListResponse>, ApiError> {
    if request.csv.trim().is_empty() {
        return Err(ApiError::invalid("CSV text is required"));
    }

    let inventory = cards::list(&state.db_pool, None)
        .await
        .map_err(|e| db_error("Inventory listing", e))?;

    let (entries, report) = resolve_lines(parse_want_list(&request.csv), &inventory);
    Ok(Json(ResolveListResponse { entries, report }))
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct ExportListRequest {
    pub entries: Vec<WantLine>,
}

/// `POST /api/list/export` -- entries in, CSV text out.
pub async fn export_list(Json(request): Json<ExportListRequest>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        export_csv(&request.entries),
    )
        .into_response()
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct ApplyEntry {
    pub card_id: i32,
    pub quantity: i32,
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct ApplyListRequest {
    pub entries: Vec<ApplyEntry>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ApplyReport {
    pub card_id: i32,
    pub outcome: LineOutcome,
    pub detail: String,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ApplyListResponse {
    pub applied: usize,
    pub report: Vec<ApplyReport>,
}

/// Classify one applied entry. Requests larger than the owned quantity are
/// floored at zero, so `removed` may fall short of `requested`.
fn apply_report(card: &OwnedCard, card_id: i32, requested: i32, removed: i32) -> ApplyReport {
    let outcome = if removed < requested {
        LineOutcome::QuantityCapped
    } else {
        LineOutcome::Matched
    };
    let detail = if card.quantity <= 0 {
        format!(
            "removed {removed} of {requested} requested; \"{}\" deleted at 0",
            card.name
        )
    } else {
        format!("removed {removed}x \"{}\", {} left", card.name, card.quantity)
    };
    ApplyReport {
        card_id,
        outcome,
        detail,
    }
}

/// `POST /api/list/apply` -- decrement each matched row by the listed
/// quantity, flooring at zero; rows that reach zero are deleted.
pub async fn apply_list(
    _user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<ApplyListRequest>,
) -> Result<Json<ApplyListResponse>, ApiError> {
    let mut applied = 0;
    let mut report = Vec::with_capacity(request.entries.len());

    for entry in request.entries {
        if entry.quantity < 1 {
            report.push(ApplyReport {
                card_id: entry.card_id,
                outcome: LineOutcome::Invalid,
                detail: format!("invalid quantity {}", entry.quantity),
            });
            continue;
        }

        let updated = cards::decrement_clamped(&state.db_pool, entry.card_id, entry.quantity)
            .await
            .map_err(|e| db_error("Quantity update", e))?;

        match updated {
            None => report.push(ApplyReport {
                card_id: entry.card_id,
                outcome: LineOutcome::NotFound,
                detail: "card not found".to_owned(),
            }),
            Some((card, removed)) => {
                if card.quantity <= 0 {
                    cards::delete(&state.db_pool, entry.card_id)
                        .await
                        .map_err(|e| db_error("Card deletion", e))?;
                }
                applied += 1;
                report.push(apply_report(&card, entry.card_id, entry.quantity, removed));
            }
        }
    }

    info!(applied, total = report.len(), "applied want list");
    Ok(Json(ApplyListResponse { applied, report }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn owned(id: i32, catalog_id: i64, name: &str, set_code: &str, rarity: &str, qty: i32, price: f64) -> OwnedCard {
        OwnedCard {
            id,
            catalog_id,
            name: name.to_owned(),
            set_code: set_code.to_owned(),
            set_rarity: rarity.to_owned(),
            quantity: qty,
            market_price: price,
            image_url: String::new(),
            image_url_small: String::new(),
            price_updated_at: Utc::now(),
        }
    }

    #[test]
    fn parse_skips_empty_lines_and_flags_malformed() {
        let parsed = parse_want_list("\n46986414,Dark Magician,LOB-005,Ultra Rare,2\n\nnot,enough,fields\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, 2);
        assert!(parsed[0].1.is_ok());
        assert!(parsed[1].1.as_ref().is_err());
    }

    #[test]
    fn parse_rejects_bad_id_and_quantity() {
        let parsed = parse_want_list("abc,Name,SET-001,Common,1\n123,Name,SET-001,Common,0");
        assert!(parsed[0].1.as_ref().is_err());
        assert!(parsed[1].1.as_ref().is_err());
    }

    #[test]
    fn exact_printing_wins_over_cheaper_alternatives() {
        let inventory = vec![
            owned(1, 100, "Dark Magician", "LOB-005", "Ultra Rare", 3, 40.0),
            owned(2, 100, "Dark Magician", "SDY-006", "Common", 3, 1.0),
        ];
        let lines = parse_want_list("100,Dark Magician,LOB-005,Ultra Rare,2");
        let (entries, report) = resolve_lines(lines, &inventory);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].card_id, 1);
        assert_eq!(entries[0].quantity, 2);
        assert_eq!(report[0].outcome, LineOutcome::Matched);
    }

    #[test]
    fn mismatched_printing_falls_back_to_partial_then_cheapest() {
        let inventory = vec![
            owned(1, 100, "Dark Magician", "LOB-005", "Ultra Rare", 3, 40.0),
            owned(2, 100, "Dark Magician", "SDY-006", "Common", 3, 1.0),
        ];
        // Rarity matches row 1 even though the set code matches nothing.
        let lines = parse_want_list("100,Dark Magician,XXX-000,Ultra Rare,1");
        let (entries, _) = resolve_lines(lines, &inventory);
        assert_eq!(entries[0].card_id, 1);

        // No partial match at all: the cheapest same-id row wins.
        let lines = parse_want_list("100,Dark Magician,XXX-000,Secret Rare,1");
        let (entries, _) = resolve_lines(lines, &inventory);
        assert_eq!(entries[0].card_id, 2);
    }

    #[test]
    fn requested_quantity_capped_at_owned() {
        let inventory = vec![owned(1, 100, "Kuriboh", "MRD-071", "Common", 2, 0.5)];
        let lines = parse_want_list("100,Kuriboh,MRD-071,Common,5");
        let (entries, report) = resolve_lines(lines, &inventory);
        assert_eq!(entries[0].quantity, 2);
        assert_eq!(report[0].outcome, LineOutcome::QuantityCapped);
    }

    #[test]
    fn unknown_id_reports_not_found() {
        let inventory = vec![owned(1, 100, "Kuriboh", "MRD-071", "Common", 2, 0.5)];
        let lines = parse_want_list("999,Blue-Eyes,LOB-001,Ultra Rare,1");
        let (entries, report) = resolve_lines(lines, &inventory);
        assert!(entries.is_empty());
        assert_eq!(report[0].outcome, LineOutcome::NotFound);
    }

    #[test]
    fn repeated_lines_merge_and_stay_capped() {
        let inventory = vec![owned(1, 100, "Kuriboh", "MRD-071", "Common", 3, 0.5)];
        let lines = parse_want_list("100,Kuriboh,MRD-071,Common,2\n100,Kuriboh,MRD-071,Common,2");
        let (entries, _) = resolve_lines(lines, &inventory);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quantity, 3);
    }

    #[test]
    fn over_requested_apply_flags_capped_and_deletion() {
        // Owned 2, asked for 5: the clamped decrement floors at zero and
        // removes only 2, and the row is slated for deletion.
        let mut card = owned(1, 100, "Kuriboh", "MRD-071", "Common", 2, 0.5);
        card.quantity = 0;
        let report = apply_report(&card, 1, 5, 2);
        assert_eq!(report.outcome, LineOutcome::QuantityCapped);
        assert!(report.detail.contains("removed 2 of 5"));
        assert!(report.detail.contains("deleted"));
    }

    #[test]
    fn exact_apply_reports_matched_with_remainder() {
        let mut card = owned(1, 100, "Kuriboh", "MRD-071", "Common", 3, 0.5);
        card.quantity = 1;
        let report = apply_report(&card, 1, 2, 2);
        assert_eq!(report.outcome, LineOutcome::Matched);
        assert!(report.detail.contains("1 left"));
    }

    #[test]
    fn export_round_trips_the_line_format() {
        let entries = vec![WantLine {
            catalog_id: 100,
            name: "Kuriboh".to_owned(),
            set_code: "MRD-071".to_owned(),
            set_rarity: "Common".to_owned(),
            quantity: 2,
        }];
        assert_eq!(export_csv(&entries), "100,Kuriboh,MRD-071,Common,2");
    }
}
