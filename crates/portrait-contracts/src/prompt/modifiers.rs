//! Prompt suffixes chosen in the generation dialog.

pub const ART_STYLES: [&str; 8] = [
    "Rimworld",
    "Artstation",
    "Anime",
    "Oil Painting",
    "Watercolor",
    "Realistic",
    "Sketch",
    "Pixel Art",
];

pub const COMPOSITIONS: [&str; 5] = ["Portrait", "Waist-up", "Full Body", "Cinematic", "Isometric"];

pub const DEFAULT_ART_STYLE: &str = "Rimworld";
pub const DEFAULT_COMPOSITION: &str = "Portrait";

const STYLE_SUFFIX: &str = " art style";

/// Replaces any known `, <Style> art style` fragment with `style`.
pub fn apply_style(prompt: &str, style: &str) -> String {
    let mut out = strip_styles(prompt);
    out.push_str(&format!(", {style}{STYLE_SUFFIX}"));
    out
}

/// Replaces any known `, <Composition>` fragment with `composition`.
pub fn apply_composition(prompt: &str, composition: &str) -> String {
    let mut out = prompt.to_string();
    for known in COMPOSITIONS {
        let fragment = format!(", {known}");
        if out.ends_with(&fragment) {
            out.truncate(out.len() - fragment.len());
            break;
        }
        remove_first(&mut out, &fragment);
    }
    out.push_str(&format!(", {composition}"));
    out
}

/// Drops text styles and tells the model to copy the style reference image.
/// Reference images follow the text part, so the style image is the second
/// image when a subject image is also sent.
pub fn apply_style_reference(prompt: &str, has_subject_image: bool) -> String {
    let reference = if has_subject_image {
        "second image"
    } else {
        "provided image"
    };
    let mut out = strip_styles(prompt);
    out.push_str(&format!(
        ". STRONGLY FOLLOW THE STYLE OF THE {}. Replicate the art style of the {reference} exactly, ignoring any other style descriptions.",
        reference.to_uppercase()
    ));
    out
}

fn strip_styles(prompt: &str) -> String {
    let mut out = prompt.to_string();
    for style in ART_STYLES {
        remove_first(&mut out, &format!(", {style}{STYLE_SUFFIX}"));
    }
    out
}

fn remove_first(haystack: &mut String, needle: &str) {
    if let Some(idx) = haystack.find(needle) {
        haystack.replace_range(idx..idx + needle.len(), "");
    }
}
