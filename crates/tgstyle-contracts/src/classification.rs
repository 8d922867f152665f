use serde::{Deserialize, Serialize};

pub const MIN_CONFIDENCE: f64 = 0.0;
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Garment categories a classification can resolve to.
///
/// Deserialization is lenient: any unrecognized string becomes `Unknown`, so a
/// stored or upstream label can never fall outside the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum GarmentLabel {
    Dress,
    Tshirt,
    Shirt,
    Pants,
    Jeans,
    Jacket,
    Blazer,
    Sweater,
    Cardigan,
    Skirt,
    Blouse,
    Coat,
    Clothing,
    Unknown,
}

impl GarmentLabel {
    pub const ALL: [GarmentLabel; 14] = [
        GarmentLabel::Dress,
        GarmentLabel::Tshirt,
        GarmentLabel::Shirt,
        GarmentLabel::Pants,
        GarmentLabel::Jeans,
        GarmentLabel::Jacket,
        GarmentLabel::Blazer,
        GarmentLabel::Sweater,
        GarmentLabel::Cardigan,
        GarmentLabel::Skirt,
        GarmentLabel::Blouse,
        GarmentLabel::Coat,
        GarmentLabel::Clothing,
        GarmentLabel::Unknown,
    ];

    /// Classes the bundled classifier and the simulation draw from.
    pub const CORE: [GarmentLabel; 4] = [
        GarmentLabel::Dress,
        GarmentLabel::Tshirt,
        GarmentLabel::Pants,
        GarmentLabel::Jacket,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GarmentLabel::Dress => "dress",
            GarmentLabel::Tshirt => "tshirt",
            GarmentLabel::Shirt => "shirt",
            GarmentLabel::Pants => "pants",
            GarmentLabel::Jeans => "jeans",
            GarmentLabel::Jacket => "jacket",
            GarmentLabel::Blazer => "blazer",
            GarmentLabel::Sweater => "sweater",
            GarmentLabel::Cardigan => "cardigan",
            GarmentLabel::Skirt => "skirt",
            GarmentLabel::Blouse => "blouse",
            GarmentLabel::Coat => "coat",
            GarmentLabel::Clothing => "clothing",
            GarmentLabel::Unknown => "unknown",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GarmentLabel::Dress => "Dress",
            GarmentLabel::Tshirt => "T-shirt",
            GarmentLabel::Shirt => "Shirt",
            GarmentLabel::Pants => "Trousers",
            GarmentLabel::Jeans => "Jeans",
            GarmentLabel::Jacket => "Jacket",
            GarmentLabel::Blazer => "Blazer",
            GarmentLabel::Sweater => "Sweater",
            GarmentLabel::Cardigan => "Cardigan",
            GarmentLabel::Skirt => "Skirt",
            GarmentLabel::Blouse => "Blouse",
            GarmentLabel::Coat => "Coat",
            GarmentLabel::Clothing => "Clothing",
            GarmentLabel::Unknown => "Casual wear",
        }
    }

    /// Maps a model or stored class name onto the vocabulary.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        match normalized.as_str() {
            "tshirt" | "tee" => GarmentLabel::Tshirt,
            "trousers" => GarmentLabel::Pants,
            other => GarmentLabel::ALL
                .into_iter()
                .find(|label| label.as_str() == other)
                .unwrap_or(GarmentLabel::Unknown),
        }
    }
}

impl From<String> for GarmentLabel {
    fn from(value: String) -> Self {
        GarmentLabel::parse(&value)
    }
}

impl std::fmt::Display for GarmentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step of the resolver chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSource {
    ExternalInference,
    LocalModel,
    Simulated,
}

impl ResultSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultSource::ExternalInference => "external-inference",
            ResultSource::LocalModel => "local-model",
            ResultSource::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub label: GarmentLabel,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f64,
    pub source: ResultSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_text: Option<String>,
}

impl ClassificationResult {
    pub fn new(label: GarmentLabel, confidence: f64, source: ResultSource) -> Self {
        Self {
            label,
            confidence: clamp_confidence(confidence),
            source,
            detail_text: None,
        }
    }

    pub fn with_detail_text(mut self, text: impl Into<String>) -> Self {
        self.detail_text = Some(text.into());
        self.normalized()
    }

    /// Re-establishes the invariants: confidence inside [0,100] and detail text
    /// only on external-inference results.
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        if self.source != ResultSource::ExternalInference {
            self.detail_text = None;
        }
        if let Some(text) = &self.detail_text {
            if text.trim().is_empty() {
                self.detail_text = None;
            }
        }
        self
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_CONFIDENCE;
    }
    value.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

// Older clients stored confidence as a string ("87.21").
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let value = match &raw {
        serde_json::Value::Number(number) => number.as_f64().unwrap_or(MIN_CONFIDENCE),
        serde_json::Value::String(text) => text.trim().parse::<f64>().unwrap_or(MIN_CONFIDENCE),
        _ => MIN_CONFIDENCE,
    };
    Ok(clamp_confidence(value))
}
