//! EBIDAT adapter (Slovakia and Denmark).
//!
//! EBIDAT is a German castle database with paginated result lists. Each
//! result page embeds one hidden form per reachable page; the form for the
//! next page carries the selection nonce needed to request it.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use castlefinder_shared::text::to_ascii;
use castlefinder_shared::{Castle, CastleFinderError, Country, PropertyCondition, Result, Source};

use super::{CandidateSink, CastleSource, selector, text_of};
use crate::fetch::PageFetcher;

const HOST: &str = "https://www.ebidat.de";

/// First result page per country.
const LISTINGS: [(Country, &str); 2] = [
    (
        Country::Denmark,
        "https://www.ebidat.de/cgi-bin/ebidat.pl?a=a&te53=2",
    ),
    (
        Country::Slovakia,
        "https://www.ebidat.de/cgi-bin/ebidat.pl?a=a&te53=6",
    ),
];

/// Hard stop for one country's pagination.
const MAX_PAGES: usize = 500;

const LABEL_CONDITION: &str = "Erhaltung - Heutiger Zustand:";
const LABEL_PERIOD: &str = "Datierung-Beginn:";
const LABEL_CITY: &str = "Stadt / Gemeinde:";
const LABEL_DISTRICT: &str = "Gemarkung / Ortsteil:";

static CENTURY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2})\.Jh\.").unwrap());

/// EBIDAT result lists and castle fact sheets.
pub struct Ebidat {
    fetcher: Arc<dyn PageFetcher>,
}

impl Ebidat {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Walk one country's result pages. Returns `false` if the sink closed.
    async fn collect_country(
        &self,
        cancel: &CancellationToken,
        sink: &CandidateSink,
        country: Country,
        first_page: &str,
    ) -> bool {
        let mut link = first_page.to_string();
        let mut seen_nonces = HashSet::new();

        for page in 1..=MAX_PAGES {
            let body = match self.fetcher.fetch(cancel, &link).await {
                Ok(body) => body,
                Err(e) => return sink.error(e).await,
            };

            let listing = parse_listing(&body, country);
            debug!(%country, page, count = listing.candidates.len(), "collected result page");
            for candidate in listing.candidates {
                if !sink.candidate(candidate).await {
                    return false;
                }
            }

            match listing.next {
                Some(next) if seen_nonces.insert(next.nonce.clone()) => link = next.url,
                Some(next) => {
                    debug!(%country, nonce = %next.nonce, "pagination nonce repeated");
                    return true;
                }
                None => return true,
            }
        }

        warn!(%country, max_pages = MAX_PAGES, "pagination ceiling reached");
        true
    }
}

#[async_trait]
impl CastleSource for Ebidat {
    fn source(&self) -> Source {
        Source::Ebidat
    }

    #[instrument(skip_all, fields(source = %self.source()))]
    async fn collect(&self, cancel: &CancellationToken, sink: &CandidateSink) {
        for (country, first_page) in LISTINGS {
            if cancel.is_cancelled() {
                return;
            }
            if !self.collect_country(cancel, sink, country, first_page).await {
                return;
            }
        }
    }

    #[instrument(skip_all, fields(source = %self.source(), link = %candidate.current_enrichment_link))]
    async fn enrich(&self, cancel: &CancellationToken, candidate: Castle) -> Result<Castle> {
        let url = format!("{}&m=h", candidate.current_enrichment_link);
        let body = self.fetcher.fetch(cancel, &url).await?;
        let mut castle = parse_detail(candidate, &body, &url)?;
        castle.clean_fields();
        Ok(castle)
    }
}

// ---------------------------------------------------------------------------
// Result pages
// ---------------------------------------------------------------------------

struct ResultPage {
    candidates: Vec<Castle>,
    next: Option<NextPage>,
}

#[derive(Debug, PartialEq)]
struct NextPage {
    nonce: String,
    url: String,
}

fn parse_listing(body: &str, country: Country) -> ResultPage {
    let doc = Html::parse_document(body);
    let link_sel = selector("a");

    let candidates = doc
        .select(&selector(".mainContent .burgenanzeige .burgenanreisser"))
        .filter_map(|teaser| {
            let a = teaser.select(&link_sel).next()?;
            let link = absolute(a.value().attr("href")?)?;
            let name = text_of(a).trim().to_string();
            if name.is_empty() {
                return None;
            }
            let mut castle = Castle::candidate(name, country, Source::Ebidat, link.clone());
            castle.add_source(link);
            Some(castle)
        })
        .collect();

    ResultPage {
        candidates,
        next: next_page(&doc),
    }
}

fn absolute(href: &str) -> Option<String> {
    let base = Url::parse(HOST).ok()?;
    base.join(href).ok().map(String::from)
}

/// The page after the one currently shown, if the page links to it.
fn next_page(doc: &Html) -> Option<NextPage> {
    let current: usize = doc
        .select(&selector("section.ergebnis b"))
        .next()
        .and_then(|b| text_of(b).trim().parse().ok())?;
    let next = current + 1;

    let nonce = doc
        .select(&selector(&format!(
            r#"form[name="formseite{next}"] input[name="var_datei_selektionen"]"#
        )))
        .next()
        .and_then(|input| input.value().attr("value"))
        .filter(|v| !v.is_empty())?
        .to_string();

    let url = format!(
        "{HOST}/cgi-bin/r30msvcshop_anzeige.pl?var_hauptpfad=../r30/vc_shop/\
         &var_datei_selektionen={nonce}&var_anzahl_angezeigte_saetze={}",
        page_offset(next)
    );
    Some(NextPage { nonce, url })
}

/// Record offset the result script expects for `page` (1-based).
fn page_offset(page: usize) -> String {
    if page == 1 {
        "00".to_string()
    } else {
        ((page - 1) * 10).to_string()
    }
}

// ---------------------------------------------------------------------------
// Fact sheet
// ---------------------------------------------------------------------------

/// Label/value rows of a castle fact sheet, in page order.
struct Facts(Vec<(String, String)>);

impl Facts {
    fn parse(doc: &Html) -> Self {
        let label_sel = selector(".gruppe");
        let value_sel = selector(".gruppenergebnis");
        let rows = doc
            .select(&selector("li.daten"))
            .filter_map(|li| {
                let label = li.select(&label_sel).next().map(text_of)?;
                let value = li.select(&value_sel).next().map(text_of).unwrap_or_default();
                Some((label.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        Self(rows)
    }

    /// Value of the last row whose label contains `label`.
    fn containing(&self, label: &str) -> String {
        self.0
            .iter()
            .rev()
            .find(|(l, _)| l.contains(label))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Value of the last non-empty row labelled exactly `label`.
    fn exact(&self, label: &str) -> Option<String> {
        self.0
            .iter()
            .rev()
            .find(|(l, v)| l == label && !v.is_empty())
            .map(|(_, v)| v.clone())
    }
}

fn parse_detail(candidate: Castle, body: &str, url: &str) -> Result<Castle> {
    let doc = Html::parse_document(body);
    let facts = Facts::parse(&doc);
    if facts.0.is_empty() {
        return Err(CastleFinderError::parse(format!("no fact sheet at [{url}]")));
    }

    let mut castle = candidate;
    castle.property_condition = parse_condition(&facts.containing(LABEL_CONDITION));
    castle.foundation_period = century(&facts.containing(LABEL_PERIOD));
    castle.state = state(&facts, castle.country);
    castle.city = facts.containing(LABEL_CITY);
    castle.district = facts.containing(LABEL_DISTRICT);
    castle.picture_url = gallery_picture(&doc);
    castle.coordinates = coordinates(&doc);
    let link = castle.current_enrichment_link.clone();
    castle.add_source(link);
    Ok(castle)
}

/// Region labels differ per country. Danish pages fall back from Region
/// to Kreis to the municipality; a repeated label keeps its last row.
fn state(facts: &Facts, country: Country) -> String {
    let labels: &[&str] = match country {
        Country::Slovakia => &["Bundesland:"],
        Country::Denmark => &["Region:", "Kreis:", LABEL_CITY],
        _ => &[],
    };
    labels
        .iter()
        .find_map(|label| facts.exact(label))
        .unwrap_or_default()
}

fn parse_condition(raw: &str) -> PropertyCondition {
    match to_ascii(&raw.trim().to_lowercase()).as_str() {
        "weitgehend erhalten" | "stark historisierend uberformt" | "uberbaut" => {
            PropertyCondition::Intact
        }
        "geringe reste" | "bedeutende reste" | "fundamente" => PropertyCondition::Ruins,
        _ => PropertyCondition::Unknown,
    }
}

/// `"um 12.Jh."` ⇒ `"12th"`.
fn century(raw: &str) -> String {
    CENTURY
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| format!("{}th", m.as_str()))
        .unwrap_or_default()
}

fn gallery_picture(doc: &Html) -> String {
    let Some(src) = doc
        .select(&selector("div.galerie img"))
        .next()
        .and_then(|img| img.value().attr("src"))
    else {
        return String::new();
    };
    if src.starts_with("http") {
        return src.to_string();
    }
    format!("{HOST}{}", src.replace("..", ""))
}

/// Coordinates from the Google Maps link's `q=` parameter.
fn coordinates(doc: &Html) -> String {
    doc.select(&selector("#verlinkungen .informationen_link a"))
        .find(|a| text_of(*a).trim() == "Google Maps")
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| href.split_once("q="))
        .map(|(_, q)| q.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::super::testing::{StaticPages, collect_all};
    use super::*;

    fn result_page(current: usize, names: &[(&str, &str)], next_nonce: Option<&str>) -> String {
        let teasers: String = names
            .iter()
            .map(|(name, href)| {
                format!(
                    r#"<div class="burgenanreisser"><a href="{href}">{name}</a><p>teaser</p></div>"#
                )
            })
            .collect();
        let form = next_nonce
            .map(|nonce| {
                format!(
                    r#"<form method="GET" action="/cgi-bin/r30msvcshop_anzeige.pl" name="formseite{}">
                        <input name="var_hauptpfad" type="hidden" value="../r30/vc_shop/">
                        <input name="var_datei_selektionen" type="hidden" value="{nonce}">
                    </form>"#,
                    current + 1
                )
            })
            .unwrap_or_default();
        format!(
            r#"<html><body><div class="mainContent">
                <section class="ergebnis"><ul><li>
                    <label>Ergebnis: 46</label> [ <b>{current}</b> ]
                    {form}
                </li></ul></section>
                <div class="burgenanzeige">{teasers}</div>
            </div></body></html>"#
        )
    }

    fn next_url(nonce: &str, page: usize) -> String {
        format!(
            "https://www.ebidat.de/cgi-bin/r30msvcshop_anzeige.pl?var_hauptpfad=../r30/vc_shop/\
             &var_datei_selektionen={nonce}&var_anzahl_angezeigte_saetze={}",
            page_offset(page)
        )
    }

    const FACT_SHEET: &str = r#"
        <html><body><div class="mainContent"><section>
        <div class="galerie"><img src="../bilder/burgen/bojnice.jpg"></div>
        <article class="beschreibung"><ul>
            <li class="daten"><div class="gruppe">Bundesland:</div><div class="gruppenergebnis">Trenčiansky kraj</div></li>
            <li class="daten"><div class="gruppe">Stadt / Gemeinde:</div><div class="gruppenergebnis">Bojnice</div></li>
            <li class="daten"><div class="gruppe">Gemarkung / Ortsteil:</div><div class="gruppenergebnis">Bojnice &amp; Okolie</div></li>
            <li class="daten"><div class="gruppe">Datierung-Beginn:</div><div class="gruppenergebnis">um 1113 (12.Jh.)</div></li>
            <li class="daten"><div class="gruppe">Erhaltung - Heutiger Zustand:</div><div class="gruppenergebnis">Stark historisierend überformt</div></li>
        </ul></article>
        <div id="verlinkungen"><div class="informationen_link">
            <a href="https://www.openstreetmap.org/">OpenStreetMap</a>
            <a href="https://maps.google.com/maps?q=48.780,18.578">Google Maps</a>
        </div></div>
        </section></div></body></html>"#;

    #[test]
    fn next_page_reads_current_page_and_nonce() {
        let doc = Html::parse_document(&result_page(1, &[], Some("20240613/2127.dat")));
        let next = next_page(&doc).unwrap();
        assert_eq!(next.nonce, "20240613/2127.dat");
        assert_eq!(next.url, next_url("20240613/2127.dat", 2));
        assert!(next.url.ends_with("var_anzahl_angezeigte_saetze=10"));
    }

    #[test]
    fn last_page_has_no_next() {
        let doc = Html::parse_document(&result_page(5, &[], None));
        assert_eq!(next_page(&doc), None);
    }

    #[test]
    fn page_offsets() {
        assert_eq!(page_offset(1), "00");
        assert_eq!(page_offset(2), "10");
        assert_eq!(page_offset(21), "200");
    }

    #[tokio::test]
    async fn follows_pagination_until_exhausted() {
        let dk_first = LISTINGS[0].1;
        let sk_first = LISTINGS[1].1;
        let pages = StaticPages::default()
            .with(
                dk_first,
                &result_page(1, &[("Spøttrup", "/cgi-bin/ebidat.pl?id=1")], Some("n-dk-2")),
            )
            .with(
                &next_url("n-dk-2", 2),
                &result_page(2, &[("Gurre", "/cgi-bin/ebidat.pl?id=2")], None),
            )
            .with(
                sk_first,
                &result_page(1, &[("Bojnický zámok", "/cgi-bin/ebidat.pl?id=3")], None),
            );
        let adapter = Ebidat::new(Arc::new(pages));

        let (castles, errors) = collect_all(&adapter).await;
        assert!(errors.is_empty(), "{errors:?}");
        let names: Vec<(&str, Country)> =
            castles.iter().map(|c| (c.name.as_str(), c.country)).collect();
        assert_eq!(
            names,
            vec![
                ("Spøttrup", Country::Denmark),
                ("Gurre", Country::Denmark),
                ("Bojnický zámok", Country::Slovakia),
            ]
        );
        assert_eq!(
            castles[0].current_enrichment_link,
            "https://www.ebidat.de/cgi-bin/ebidat.pl?id=1"
        );
        assert_eq!(castles[0].sources, vec![castles[0].current_enrichment_link.clone()]);
    }

    #[tokio::test]
    async fn repeated_nonce_stops_pagination() {
        let dk_first = LISTINGS[0].1;
        let pages = Arc::new(
            StaticPages::default()
                .with(dk_first, &result_page(1, &[("A", "/a")], Some("same")))
                .with(&next_url("same", 2), &result_page(1, &[("B", "/b")], Some("same")))
                .with(LISTINGS[1].1, &result_page(1, &[], None)),
        );
        let adapter = Ebidat::new(pages.clone());

        let (castles, _errors) = collect_all(&adapter).await;
        assert_eq!(castles.len(), 2);
        let requested = pages.requested();
        assert_eq!(requested.iter().filter(|u| u.contains("same")).count(), 1);
    }

    #[tokio::test]
    async fn failed_country_does_not_stop_the_next() {
        let pages = StaticPages::default()
            .with(LISTINGS[1].1, &result_page(1, &[("Bojnice", "/b")], None));
        let adapter = Ebidat::new(Arc::new(pages));

        let (castles, errors) = collect_all(&adapter).await;
        assert_eq!(castles.len(), 1);
        assert_eq!(castles[0].country, Country::Slovakia);
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn enriches_from_fact_sheet() {
        let link = "https://www.ebidat.de/cgi-bin/ebidat.pl?id=3";
        let pages = StaticPages::default().with(&format!("{link}&m=h"), FACT_SHEET);
        let adapter = Ebidat::new(Arc::new(pages));
        let candidate = Castle::candidate("Bojnický zámok", Country::Slovakia, Source::Ebidat, link);

        let castle = adapter
            .enrich(&CancellationToken::new(), candidate)
            .await
            .unwrap();
        assert_eq!(castle.state, "trenčiansky kraj");
        assert_eq!(castle.city, "bojnice");
        assert_eq!(castle.district, "bojnice & okolie");
        assert_eq!(castle.foundation_period, "12th");
        assert_eq!(castle.property_condition, PropertyCondition::Intact);
        assert_eq!(castle.coordinates, "48.780,18.578");
        assert_eq!(castle.picture_url, "https://www.ebidat.de/bilder/burgen/bojnice.jpg");
        assert_eq!(castle.sources, vec![link.to_string()]);
    }

    #[test]
    fn danish_state_prefers_region_then_kreis() {
        let facts = Facts(vec![
            ("Stadt / Gemeinde:".into(), "Skive".into()),
            ("Kreis:".into(), "Viborg Amt".into()),
        ]);
        assert_eq!(state(&facts, Country::Denmark), "Viborg Amt");

        let facts = Facts(vec![("Stadt / Gemeinde:".into(), "Skive".into())]);
        assert_eq!(state(&facts, Country::Denmark), "Skive");
    }

    #[test]
    fn repeated_state_label_keeps_the_last_row() {
        let facts = Facts(vec![
            ("Bundesland:".into(), "Nitra".into()),
            ("Region:".into(), "Pohronie".into()),
            ("Bundesland:".into(), "Trnava".into()),
            ("Bundesland:".into(), String::new()),
        ]);
        assert_eq!(state(&facts, Country::Slovakia), "Trnava");
    }

    #[test]
    fn condition_descriptors() {
        assert_eq!(parse_condition("weitgehend erhalten"), PropertyCondition::Intact);
        assert_eq!(parse_condition("Überbaut"), PropertyCondition::Intact);
        assert_eq!(parse_condition("Geringe Reste"), PropertyCondition::Ruins);
        assert_eq!(parse_condition("Fundamente"), PropertyCondition::Ruins);
        assert_eq!(parse_condition("verschwunden"), PropertyCondition::Unknown);
    }

    #[test]
    fn century_from_dating() {
        assert_eq!(century("um 1113 (12.Jh.)"), "12th");
        assert_eq!(century("unbekannt"), "");
    }
}
