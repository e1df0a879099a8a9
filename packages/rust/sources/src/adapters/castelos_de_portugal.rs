//! castelosdeportugal.pt adapter (Portugal).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use castlefinder_shared::{Castle, CastleFinderError, Country, PropertyCondition, Result, Source};

use super::{CandidateSink, CastleSource, selector, text_of};
use crate::fetch::PageFetcher;

const HOST: &str = "https://www.castelosdeportugal.pt";
const SITEMAP_PATH: &str = "/castelos/SiteMap.html";

/// Table rows read from a detail page.
const ROW_STATE: &str = "Distrito";
const ROW_CITY: &str = "Concelho";
const ROW_DISTRICT: &str = "Freguesia";
const ROW_PERIOD: &str = "Construção";
const ROW_CONDITION: &str = "Conservação";

/// Single sitemap listing every Portuguese castle, one detail table each.
pub struct CastelosDePortugal {
    fetcher: Arc<dyn PageFetcher>,
}

impl CastelosDePortugal {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl CastleSource for CastelosDePortugal {
    fn source(&self) -> Source {
        Source::CastelosDePortugal
    }

    #[instrument(skip_all, fields(source = %self.source()))]
    async fn collect(&self, cancel: &CancellationToken, sink: &CandidateSink) {
        let url = format!("{HOST}{SITEMAP_PATH}");
        let body = match self.fetcher.fetch(cancel, &url).await {
            Ok(body) => body,
            Err(e) => {
                sink.error(e).await;
                return;
            }
        };

        let candidates = parse_sitemap(&body);
        if candidates.is_empty() {
            sink.error(CastleFinderError::parse(format!("no castles listed at [{url}]")))
                .await;
            return;
        }

        debug!(count = candidates.len(), "collected candidates");
        for candidate in candidates {
            if !sink.candidate(candidate).await {
                return;
            }
        }
    }

    #[instrument(skip_all, fields(source = %self.source(), link = %candidate.current_enrichment_link))]
    async fn enrich(&self, cancel: &CancellationToken, candidate: Castle) -> Result<Castle> {
        let body = self
            .fetcher
            .fetch(cancel, &candidate.current_enrichment_link)
            .await?;
        let mut castle = parse_detail(candidate, &body)?;
        castle.clean_fields();
        Ok(castle)
    }
}

fn parse_sitemap(body: &str) -> Vec<Castle> {
    let doc = Html::parse_document(body);
    doc.select(&selector("#indice div a"))
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let name = text_of(a).trim().to_string();
            if name.is_empty() {
                return None;
            }
            let link = format!("{HOST}/castelos/{href}");
            Some(Castle::candidate(
                name,
                Country::Portugal,
                Source::CastelosDePortugal,
                link,
            ))
        })
        .collect()
}

fn parse_detail(candidate: Castle, body: &str) -> Result<Castle> {
    let doc = Html::parse_document(body);
    let row_sel = selector("#info-table tbody tr");
    let key_sel = selector("td:nth-child(1)");
    let value_sel = selector("td:nth-child(2)");

    let mut rows: HashMap<String, String> = HashMap::new();
    for row in doc.select(&row_sel) {
        let Some(key) = row.select(&key_sel).next() else {
            continue;
        };
        let value = row
            .select(&value_sel)
            .next()
            .map(|v| text_of(v).trim().to_string())
            .unwrap_or_default();
        rows.insert(text_of(key).trim().to_string(), value);
    }

    if rows.is_empty() {
        return Err(CastleFinderError::parse(format!(
            "no info table at [{}]",
            candidate.current_enrichment_link
        )));
    }

    let get = |key: &str| rows.get(key).cloned().unwrap_or_default();
    let city = get(ROW_CITY);
    // Some pages key the parish row by the municipality name.
    let district = Some(get(ROW_DISTRICT))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| get(&city));

    let mut castle = candidate;
    castle.state = get(ROW_STATE);
    castle.district = district;
    castle.city = city;
    castle.foundation_period = get(ROW_PERIOD);
    castle.property_condition = parse_condition(&get(ROW_CONDITION));
    let link = castle.current_enrichment_link.clone();
    castle.add_source(link);
    Ok(castle)
}

fn parse_condition(raw: &str) -> PropertyCondition {
    match raw.trim().to_lowercase().as_str() {
        "boa" => PropertyCondition::Intact,
        "razoável" => PropertyCondition::Damaged,
        "mau" | "submerso" => PropertyCondition::Ruins,
        _ => PropertyCondition::Unknown,
    }
}
