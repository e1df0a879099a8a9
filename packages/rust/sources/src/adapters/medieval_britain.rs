//! medievalbritain.com adapter (United Kingdom).

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use scraper::{ElementRef, Html};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use castlefinder_shared::{
    Castle, CastleFinderError, Contact, Country, PropertyCondition, Result, Source, VisitingInfo,
};

use super::{
    CandidateSink, CastleSource, facilities_from_icons, first_text, next_element, selector,
    text_of,
};
use crate::fetch::PageFetcher;

/// One listing page per constituent country.
const LISTINGS: [&str; 4] = [
    "https://medievalbritain.com/medieval-castles-of-england",
    "https://medievalbritain.com/medieval-castles-of-scotland",
    "https://medievalbritain.com/medieval-castles-of-wales",
    "https://medievalbritain.com/medieval-castles-of-northern-ireland",
];

/// Medieval Britain's per-country castle lists and article pages.
pub struct MedievalBritain {
    fetcher: Arc<dyn PageFetcher>,
}

impl MedievalBritain {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    async fn listing(&self, cancel: &CancellationToken, url: &str) -> Result<Vec<Castle>> {
        let body = self.fetcher.fetch(cancel, url).await?;
        Ok(parse_listing(&body))
    }
}

#[async_trait]
impl CastleSource for MedievalBritain {
    fn source(&self) -> Source {
        Source::MedievalBritain
    }

    #[instrument(skip_all, fields(source = %self.source()))]
    async fn collect(&self, cancel: &CancellationToken, sink: &CandidateSink) {
        // Each listing resolves to its own result; order follows LISTINGS.
        let pages = join_all(LISTINGS.iter().map(|url| self.listing(cancel, url))).await;

        for (url, page) in LISTINGS.iter().zip(pages) {
            match page {
                Ok(candidates) => {
                    debug!(%url, count = candidates.len(), "collected candidates");
                    for candidate in candidates {
                        if !sink.candidate(candidate).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    if !sink.error(e).await {
                        return;
                    }
                }
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

fn parse_listing(body: &str) -> Vec<Castle> {
    let doc = Html::parse_document(body);
    doc.select(&selector(".elementor-post .elementor-post__title a"))
        .filter_map(|a| {
            let link = a.value().attr("href")?;
            let name = text_of(a).replace(['\t', '\n'], "").trim().to_string();
            if name.is_empty() {
                return None;
            }
            Some(Castle::candidate(
                name,
                Country::Uk,
                Source::MedievalBritain,
                link,
            ))
        })
        .collect()
}

fn parse_detail(candidate: Castle, body: &str) -> Result<Castle> {
    let doc = Html::parse_document(body);

    let state = state(&doc);
    let city = city(&doc);
    let coordinates = coordinates(&doc);
    if state.is_empty() && city.is_empty() && coordinates.is_empty() {
        return Err(CastleFinderError::parse(format!(
            "no location block at [{}]",
            candidate.current_enrichment_link
        )));
    }

    let mut castle = candidate;
    castle.state = state;
    castle.city = city;
    castle.coordinates = coordinates;
    castle.picture_url = doc
        .select(&selector("meta[property='og:image']"))
        .next()
        .and_then(|m| m.value().attr("content"))
        .unwrap_or_default()
        .to_string();
    castle.contact = phone(&doc).map(|phone| Contact {
        phone,
        email: String::new(),
    });
    castle.visiting_info = Some(VisitingInfo {
        working_hours: working_hours(&doc),
        facilities: facilities_from_icons(&doc),
    });
    castle.property_condition = PropertyCondition::Unknown;
    let link = castle.current_enrichment_link.clone();
    castle.add_source(link);
    Ok(castle)
}

/// County line: the paragraph holding the first location link, cut before
/// the coordinates in parentheses.
fn state(doc: &Html) -> String {
    let Some(link) = doc
        .select(&selector(
            ".elementor-widget-container div.elementor-text-editor.elementor-clearfix p a",
        ))
        .next()
    else {
        return String::new();
    };
    let Some(paragraph) = link.parent().and_then(ElementRef::wrap) else {
        return String::new();
    };

    let text = text_of(paragraph).replace(['\n', '\t'], "");
    match text.split_once('(') {
        Some((before, _)) => before.to_string(),
        None => text,
    }
}

/// The paragraph after the "Address" heading, up to the first comma.
fn city(doc: &Html) -> String {
    doc.select(&selector(".elementor-text-editor.elementor-clearfix p"))
        .filter(|p| text_of(*p).trim() == "Address")
        .filter_map(next_element)
        .map(|p| {
            let text = text_of(p);
            match text.split_once(',') {
                Some((before, _)) => before.to_string(),
                None => text,
            }
        })
        .last()
        .unwrap_or_default()
}

fn coordinates(doc: &Html) -> String {
    let tidy = |s: &str| s.replace('′', "'").replace('″', "\"").replace(' ', ",");

    let latitude = first_text(doc, ".geo-default .latitude");
    let longitude = first_text(doc, ".geo-default .longitude");
    if !latitude.is_empty() && !longitude.is_empty() {
        return format!("{},{}", tidy(&latitude), tidy(&longitude));
    }

    let decimal = first_text(doc, ".geo-default .geo-dec");
    if !decimal.is_empty() {
        return decimal;
    }

    let anchors = selector("a");
    for a in doc.select(&anchors) {
        let href = a.value().attr("href").unwrap_or_default();
        if href.contains("https://goo.gl/maps/") {
            return text_of(a).replace(' ', "");
        }
        if href.contains("tools.wmflabs.org") {
            let text = text_of(a);
            let mut parts = text.split(' ');
            if let (Some(lat), Some(lng)) = (parts.next(), parts.next()) {
                return format!("{lat},{lng}");
            }
        }
    }

    String::new()
}

/// Phone number sits in the paragraph after the "Phone" label.
fn phone(doc: &Html) -> Option<String> {
    let label = doc
        .select(&selector(".elementor-text-editor .w8qArf"))
        .next()?;
    let paragraph = label.parent().and_then(ElementRef::wrap)?;
    let phone = text_of(next_element(paragraph)?).trim().to_string();
    (!phone.is_empty()).then_some(phone)
}

fn working_hours(doc: &Html) -> String {
    let strong = selector("strong");
    let is_hours_heading = |el: ElementRef<'_>| {
        el.select(&strong).any(|s| text_of(s).trim() == "Hours")
    };

    // Labelled lines following the heading paragraph.
    let mut hours = Vec::new();
    if let Some(heading) = doc
        .select(&selector(".elementor-text-editor p"))
        .find(|p| is_hours_heading(*p))
    {
        hours.extend(
            heading
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .map(text_of)
                .filter(|t| t.contains(':')),
        );
    }
    let joined = hours.join(",").replace('–', "-");
    if !joined.is_empty() {
        return joined;
    }

    let editor_sel = selector(".elementor-text-editor");
    let paragraph_sel = selector("p");
    for editor in doc.select(&editor_sel).filter(|e| is_hours_heading(*e)) {
        // Free text after the heading.
        let text: String = editor.select(&paragraph_sel).map(text_of).collect();
        let text = text.replace("Hours", "").trim().to_string();
        if !text.is_empty() {
            return text;
        }

        // Season table.
        let season_sel = selector("td.SKNSIb");
        let cell_sel = selector("td");
        let rows: Vec<String> = editor
            .select(&selector("table.WgFkxc tr"))
            .filter_map(|tr| {
                let season = tr.select(&season_sel).next().map(text_of)?;
                let time = tr.select(&cell_sel).last().map(text_of)?;
                let (season, time) = (season.trim(), time.trim());
                (!season.is_empty() && !time.is_empty()).then(|| format!("{season}: {time}"))
            })
            .collect();
        if !rows.is_empty() {
            return rows.join(", ").replace('–', "-");
        }
    }

    String::new()
}
