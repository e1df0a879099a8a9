//! Core domain types: the canonical castle record and its enumerations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::text;

// ---------------------------------------------------------------------------
// Country
// ---------------------------------------------------------------------------

/// Countries covered by at least one source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    #[serde(rename = "pt")]
    Portugal,
    #[serde(rename = "uk")]
    Uk,
    #[serde(rename = "ie")]
    Ireland,
    #[serde(rename = "sk")]
    Slovakia,
    #[serde(rename = "dk")]
    Denmark,
}

impl Country {
    /// All supported countries.
    pub const ALL: [Country; 5] = [
        Country::Portugal,
        Country::Uk,
        Country::Ireland,
        Country::Slovakia,
        Country::Denmark,
    ];

    /// Lowercase code used in identities and storage keys.
    pub fn code(self) -> &'static str {
        match self {
            Country::Portugal => "pt",
            Country::Uk => "uk",
            Country::Ireland => "ie",
            Country::Slovakia => "sk",
            Country::Denmark => "dk",
        }
    }
}

impl std::fmt::Display for Country {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Country {
    type Err = crate::CastleFinderError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Country::ALL
            .into_iter()
            .find(|c| c.code() == wanted)
            .ok_or_else(|| crate::CastleFinderError::parse(format!("unknown country [{s}]")))
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Identifier of the site adapter that produced or owns a castle instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    CastelosDePortugal,
    HeritageIreland,
    MedievalBritain,
    Ebidat,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::CastelosDePortugal => "CastelosDePortugal",
            Source::HeritageIreland => "HeritageIreland",
            Source::MedievalBritain => "MedievalBritain",
            Source::Ebidat => "EBIDAT",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PropertyCondition
// ---------------------------------------------------------------------------

/// State of preservation. Precedence is given by [`comparison_weight`],
/// never by declaration order.
///
/// [`comparison_weight`]: PropertyCondition::comparison_weight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyCondition {
    #[default]
    Unknown,
    Intact,
    Damaged,
    Ruins,
}

impl PropertyCondition {
    /// Merge precedence: Unknown < Ruins < Damaged < Intact.
    pub fn comparison_weight(self) -> u8 {
        match self {
            PropertyCondition::Unknown => 0,
            PropertyCondition::Ruins => 1,
            PropertyCondition::Damaged => 2,
            PropertyCondition::Intact => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyCondition::Unknown => "unknown",
            PropertyCondition::Intact => "intact",
            PropertyCondition::Damaged => "damaged",
            PropertyCondition::Ruins => "ruins",
        }
    }

    /// Parse the stored lowercase form; anything unrecognised is `Unknown`.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "intact" => PropertyCondition::Intact,
            "damaged" => PropertyCondition::Damaged,
            "ruins" => PropertyCondition::Ruins,
            _ => PropertyCondition::Unknown,
        }
    }
}

impl std::fmt::Display for PropertyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Contact / VisitingInfo
// ---------------------------------------------------------------------------

/// Phone and email published by a source. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

/// Facility flags shown on visitor pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facilities {
    pub assistance_dogs_allowed: bool,
    pub giftshops: bool,
    pub wheelchair_support: bool,
    pub restrooms: bool,
    pub picnic_area: bool,
    pub exhibitions: bool,
    pub cafe: bool,
    pub parking: bool,
}

impl Facilities {
    /// A facility is kept only when both sides assert it.
    pub fn intersect(&self, other: &Facilities) -> Facilities {
        Facilities {
            assistance_dogs_allowed: self.assistance_dogs_allowed && other.assistance_dogs_allowed,
            giftshops: self.giftshops && other.giftshops,
            wheelchair_support: self.wheelchair_support && other.wheelchair_support,
            restrooms: self.restrooms && other.restrooms,
            picnic_area: self.picnic_area && other.picnic_area,
            exhibitions: self.exhibitions && other.exhibitions,
            cafe: self.cafe && other.cafe,
            parking: self.parking && other.parking,
        }
    }
}

/// Opening hours and facilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitingInfo {
    #[serde(default)]
    pub working_hours: String,
    #[serde(default)]
    pub facilities: Facilities,
}

// ---------------------------------------------------------------------------
// Castle
// ---------------------------------------------------------------------------

/// The canonical castle record.
///
/// `name` and `country` are mandatory; every other field may be empty.
/// `current_enrichment_link` and `current_enrichment_source` only route a
/// candidate to its adapter during the pipeline and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Castle {
    pub name: String,
    pub country: Country,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub foundation_period: String,
    #[serde(default)]
    pub property_condition: PropertyCondition,
    #[serde(default)]
    pub coordinates: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visiting_info: Option<VisitingInfo>,
    #[serde(default, rename = "pictureURL")]
    pub picture_url: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(skip)]
    pub current_enrichment_link: String,
    #[serde(skip)]
    pub current_enrichment_source: Option<Source>,
}

impl Castle {
    /// A bare record with only the mandatory fields set.
    pub fn new(name: impl Into<String>, country: Country) -> Self {
        Self {
            name: name.into(),
            country,
            state: String::new(),
            city: String::new(),
            district: String::new(),
            foundation_period: String::new(),
            property_condition: PropertyCondition::Unknown,
            coordinates: String::new(),
            contact: None,
            visiting_info: None,
            picture_url: String::new(),
            sources: Vec::new(),
            current_enrichment_link: String::new(),
            current_enrichment_source: None,
        }
    }

    /// A candidate awaiting enrichment by `source` at `link`.
    pub fn candidate(
        name: impl Into<String>,
        country: Country,
        source: Source,
        link: impl Into<String>,
    ) -> Self {
        Self {
            current_enrichment_link: link.into(),
            current_enrichment_source: Some(source),
            ..Self::new(name, country)
        }
    }

    /// Name with diacritics, parentheses and slashes folded, whitespace
    /// replaced by [`text::NAME_SEPARATOR`].
    pub fn normalized_name(&self) -> String {
        text::normalize_name(&self.name)
    }

    /// Human-stable identity: `<country code>-<normalized name>`.
    pub fn string_id(&self) -> String {
        format!("{}-{}", self.country.code(), self.normalized_name())
    }

    /// SHA-256 of [`string_id`](Self::string_id), used as a binary key.
    pub fn binary_id(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.string_id().as_bytes());
        hasher.finalize().into()
    }

    /// Lowercase name with the country's noise words removed.
    pub fn filtered_name(&self) -> String {
        text::strip_noise(self.country, &self.name)
    }

    /// Coarse lookup tags: country, filtered name and its tokens, state,
    /// city and district (whole and tokenized) and foundation period.
    ///
    /// Never contains empty strings or bare noise words. Duplicates are
    /// removed keeping first-seen order.
    pub fn matching_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        let mut push = |tag: String| {
            if !tag.is_empty() && !text::is_noise_token(self.country, &tag) && !tags.contains(&tag)
            {
                tags.push(tag);
            }
        };

        push(self.country.code().to_string());
        for field in [&self.name, &self.state, &self.city, &self.district] {
            let filtered = text::strip_noise(self.country, field);
            for token in filtered.split(' ') {
                push(token.to_string());
            }
            push(filtered);
        }
        push(text::strip_noise(self.country, &self.foundation_period));

        tags
    }

    /// Append `url` to `sources` unless already present.
    pub fn add_source(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.sources.contains(&url) {
            self.sources.push(url);
        }
    }

    /// Trim every field, lowercase the location fields and collapse inner
    /// whitespace. Empty contacts are dropped.
    pub fn clean_fields(&mut self) {
        self.name = text::collapse_whitespace(&self.name.to_lowercase());
        self.state = text::collapse_whitespace(&self.state.to_lowercase());
        self.city = text::collapse_whitespace(&self.city.to_lowercase());
        self.district = text::collapse_whitespace(&self.district.to_lowercase());
        self.foundation_period = text::collapse_whitespace(&self.foundation_period);
        self.coordinates = self.coordinates.trim().to_string();
        self.picture_url = self.picture_url.trim().to_string();

        self.contact = self.contact.take().and_then(|c| {
            let phone = text::collapse_whitespace(&c.phone);
            let email = c.email.trim().to_string();
            (!phone.is_empty() || !email.is_empty()).then_some(Contact { phone, email })
        });

        if let Some(info) = self.visiting_info.as_mut() {
            info.working_hours = text::collapse_whitespace(&info.working_hours);
        }

        let sources = std::mem::take(&mut self.sources);
        for source in sources {
            self.add_source(source.trim());
        }
    }
}
