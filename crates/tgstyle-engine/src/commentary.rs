use rand::seq::SliceRandom;
use rand::Rng;
use tgstyle_contracts::classification::{ClassificationResult, GarmentLabel, ResultSource};

pub const MIN_COMMENTS: usize = 3;
pub const MAX_COMMENTS: usize = 5;

/// Where the analysed picture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Photo,
    Pinterest,
}

impl RequestOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Pinterest => "pinterest",
        }
    }
}

const GENERIC_RECOMMENDATIONS: [&str; 2] = [
    "This piece works well with a range of accessories.",
    "Experiment with different styles to find the ideal combination.",
];

const GENERIC_COMMENTS: [&str; 3] = [
    "This piece looks stylish.",
    "Pay attention to the quality of the materials.",
    "It combines easily with other parts of your wardrobe.",
];

const GENERAL_COMMENTS: [&str; 3] = [
    "Pay attention to how the colours in your outfit work together.",
    "Accessories can noticeably change how an outfit reads.",
    "The right shoes will finish the look.",
];

const PINTEREST_COMMENTS: [&str; 3] = [
    "Your Pinterest collection shows good taste.",
    "An interesting set of inspirations on your board.",
    "Looks like these are popular with fashion bloggers.",
];

pub fn recommendations(label: GarmentLabel) -> [&'static str; 2] {
    match label {
        GarmentLabel::Dress => [
            "Add accessories to make this dress stand out more.",
            "Try different shoes to build several looks around this dress.",
        ],
        GarmentLabel::Tshirt => [
            "Pair the T-shirt with jeans or trousers for an everyday look.",
            "Add a sharp blazer or cardigan for a more formal feel.",
        ],
        GarmentLabel::Pants => [
            "These trousers go well with shirts and blouses of many styles.",
            "Experiment with footwear to change the character of the outfit.",
        ],
        GarmentLabel::Jacket => [
            "This jacket adds style to an everyday outfit.",
            "Combine it with different T-shirts and jeans for more variety.",
        ],
        _ => GENERIC_RECOMMENDATIONS,
    }
}

fn label_comments(label: GarmentLabel) -> [&'static str; 3] {
    match label {
        GarmentLabel::Dress => [
            "This dress looks stylish and modern.",
            "Dresses like this are popular this season.",
            "The colour palette of the dress is well chosen.",
        ],
        GarmentLabel::Tshirt => [
            "This T-shirt is a great fit for casual style.",
            "A T-shirt with this cut suits many body types.",
            "You can build plenty of outfits around this T-shirt.",
        ],
        GarmentLabel::Pants => [
            "These trousers fit right into current trends.",
            "This cut is versatile and works for many occasions.",
            "The trousers combine with many different tops.",
        ],
        GarmentLabel::Jacket => [
            "This jacket will add style to your outfit.",
            "A jacket like this is a great choice between seasons.",
            "Take a look at the material and the tailoring of the jacket.",
        ],
        _ => GENERIC_COMMENTS,
    }
}

/// Picks 3 to 5 shuffled comments for the label, or Pinterest-flavoured ones.
pub fn comments<R: Rng + ?Sized>(label: GarmentLabel, origin: RequestOrigin, rng: &mut R) -> Vec<String> {
    let specific = match origin {
        RequestOrigin::Photo => label_comments(label),
        RequestOrigin::Pinterest => PINTEREST_COMMENTS,
    };
    let mut pool: Vec<&str> = specific.iter().chain(GENERAL_COMMENTS.iter()).copied().collect();
    pool.shuffle(rng);
    let count = rng.gen_range(MIN_COMMENTS..=MAX_COMMENTS);
    pool.into_iter().take(count).map(str::to_string).collect()
}

/// HTML fragment rendered by the client under the result card.
pub fn analysis_html(result: &ClassificationResult, origin: RequestOrigin, degraded: bool) -> String {
    let mut html = String::new();
    if result.source == ResultSource::ExternalInference {
        html.push_str("<div class=\"analysis-badge\">AI vision analysis</div>\n");
    }
    html.push_str(&format!(
        "<div class=\"analysis-item\">\n  <h3>Detected: {}</h3>\n  <p>Confidence: {:.2}%</p>\n</div>\n",
        escape_html(result.label.display_name()),
        result.confidence
    ));
    if result.source == ResultSource::ExternalInference {
        if let Some(detail) = result.detail_text.as_deref().filter(|text| !text.trim().is_empty()) {
            html.push_str(&format!(
                "<div class=\"analysis-item\">\n  <h3>Detailed analysis:</h3>\n  <div class=\"analysis-detail\">{}</div>\n</div>\n",
                escape_html(detail)
            ));
        }
    }
    if origin == RequestOrigin::Pinterest {
        html.push_str(
            "<div class=\"analysis-note\">Based on your Pinterest board. Upload a photo for a closer look.</div>\n",
        );
    }
    if degraded {
        html.push_str(
            "<div class=\"analysis-warning\">Note: there was a problem analysing the image. The result may be inaccurate.</div>\n",
        );
    }
    let [first, second] = recommendations(result.label);
    html.push_str(&format!(
        "<div class=\"analysis-item\">\n  <h3>Recommendations:</h3>\n  <ul>\n    <li>{first}</li>\n    <li>{second}</li>\n  </ul>\n</div>\n"
    ));
    html
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
