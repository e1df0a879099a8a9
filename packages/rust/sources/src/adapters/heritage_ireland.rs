//! heritageireland.ie adapter (Ireland).

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use castlefinder_shared::{
    Castle, CastleFinderError, Contact, Country, Result, Source, VisitingInfo,
};

use super::{
    CandidateSink, CastleSource, facilities_from_icons, first_text, next_element, selector,
    text_of,
};
use crate::fetch::PageFetcher;

const HOST: &str = "https://heritageireland.ie";
const LISTING_PATH: &str = "/visit/castles/";

/// Heritage Ireland's castle grid and per-site contact pages.
pub struct HeritageIreland {
    fetcher: Arc<dyn PageFetcher>,
}

impl HeritageIreland {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl CastleSource for HeritageIreland {
    fn source(&self) -> Source {
        Source::HeritageIreland
    }

    #[instrument(skip_all, fields(source = %self.source()))]
    async fn collect(&self, cancel: &CancellationToken, sink: &CandidateSink) {
        let url = format!("{HOST}{LISTING_PATH}");
        let body = match self.fetcher.fetch(cancel, &url).await {
            Ok(body) => body,
            Err(e) => {
                sink.error(e).await;
                return;
            }
        };

        let candidates = match parse_listing(&body) {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                sink.error(CastleFinderError::parse(format!("no castles listed at [{url}]")))
                    .await;
                return;
            }
            Err(e) => {
                sink.error(e).await;
                return;
            }
        };

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

fn parse_listing(body: &str) -> Result<Vec<Castle>> {
    let base = Url::parse(HOST).map_err(|e| CastleFinderError::parse(e.to_string()))?;
    let doc = Html::parse_document(body);
    let name_sel = selector("header div h3");

    let castles = doc
        .select(&selector("#placesgrid ul li a"))
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let link = base.join(href).ok()?;
            let name = a
                .select(&name_sel)
                .next()
                .map(|h| text_of(h).trim().to_string())
                .filter(|n| !n.is_empty())?;
            Some(Castle::candidate(
                name,
                Country::Ireland,
                Source::HeritageIreland,
                link.to_string(),
            ))
        })
        .collect();
    Ok(castles)
}

fn parse_detail(candidate: Castle, body: &str) -> Result<Castle> {
    let doc = Html::parse_document(body);

    let address = doc
        .select(&selector("#place--contact div p.address"))
        .next()
        .map(address_lines)
        .unwrap_or_default();
    let Some((district, city, state)) = split_address(&address) else {
        return Err(CastleFinderError::parse(format!(
            "no address block at [{}]",
            candidate.current_enrichment_link
        )));
    };

    let mut castle = candidate;
    castle.district = district;
    castle.city = city;
    castle.state = state;
    castle.picture_url = gallery_picture(&doc);
    castle.contact = contact(&doc);
    castle.visiting_info = Some(VisitingInfo {
        working_hours: working_hours(&doc),
        facilities: facilities_from_icons(&doc),
    });
    let link = castle.current_enrichment_link.clone();
    castle.add_source(link);
    Ok(castle)
}

/// Text of each line of an address paragraph, split on `<br>`.
fn address_lines(p: ElementRef<'_>) -> Vec<String> {
    let mut lines = vec![String::new()];
    for child in p.children() {
        match child.value() {
            Node::Text(text) => {
                if let Some(line) = lines.last_mut() {
                    line.push_str(text);
                }
            }
            Node::Element(el) if el.name() == "br" => lines.push(String::new()),
            Node::Element(_) => {
                if let (Some(line), Some(el)) = (lines.last_mut(), ElementRef::wrap(child)) {
                    line.push_str(&text_of(el));
                }
            }
            _ => {}
        }
    }

    lines
        .into_iter()
        .map(|l| l.replace([',', '\n'], "").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Map address lines to `(district, city, state)`; the line count tells
/// which lines hold what. The last line is always the postcode.
fn split_address(parts: &[String]) -> Option<(String, String, String)> {
    let n = parts.len();
    let state = parts.get(n.checked_sub(2)?)?.clone();
    match n {
        // [site, road, town, county, postcode]
        5 => Some((parts[1].clone(), parts[2].clone(), state)),
        // [town, county, postcode]
        n if n < 4 => Some((parts[0].clone(), parts[0].clone(), state)),
        // [site, town, county, postcode]
        _ => Some((parts[0].clone(), parts[1].clone(), state)),
    }
}

fn gallery_picture(doc: &Html) -> String {
    doc.select(&selector(
        "section.gallery ul.hi_gallery li a figure picture source",
    ))
    .next()
    .and_then(|s| s.value().attr("srcset"))
    .and_then(|srcset| srcset.split(' ').next())
    .unwrap_or_default()
    .to_string()
}

fn contact(doc: &Html) -> Option<Contact> {
    let phone = first_text(doc, "#place--contact div .phone");
    let email = first_text(doc, "#place--contact div .email");
    if phone.is_empty() && email.is_empty() {
        return None;
    }
    Some(Contact { phone, email })
}

fn working_hours(doc: &Html) -> String {
    let Some(section) = doc.select(&selector("section#place--opening")).next() else {
        return String::new();
    };

    let strong_sel = selector("strong");
    let dated = section
        .select(&selector("p"))
        .find(|p| p.select(&strong_sel).next().is_some());
    if let Some(p) = dated {
        let date_range = text_of(p).trim().to_string();
        let time_range = next_element(p)
            .filter(|el| el.value().name() == "p")
            .map(|el| text_of(el).trim().to_string())
            .unwrap_or_default();
        if !date_range.is_empty() && !time_range.is_empty() {
            return format!("{date_range} - {time_range}").replace('–', "-");
        }
    }

    // Accordion layout: the first paragraph holds the season.
    section
        .select(&selector("div p"))
        .next()
        .map(|p| text_of(p).trim().to_string())
        .unwrap_or_default()
}
