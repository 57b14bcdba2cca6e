use serde::{Deserialize, Serialize};

const FALLBACK_DESCRIPTION: &str =
    "A high quality portrait of a mysterious figure. Artstation style.";
const SKIN_TOLERANCE: f32 = 0.15;
const SKIN_FALLBACK_DISTANCE: f32 = 0.3;

/// Linear RGB in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    fn distance(self, other: Color) -> f32 {
        ((self.r - other.r).powi(2) + (self.g - other.g).powi(2) + (self.b - other.b).powi(2))
            .sqrt()
    }

    fn grayscale(self) -> f32 {
        0.299 * self.r + 0.587 * self.g + 0.114 * self.b
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HairDescription {
    pub color: Color,
    pub style: String,
}

/// Appearance attributes the host extracts from a character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterProfile {
    pub age_years: Option<u32>,
    pub gender: Option<Gender>,
    pub skin_color: Option<Color>,
    pub hair: Option<HairDescription>,
    pub apparel: Vec<String>,
}

pub fn describe(profile: Option<&CharacterProfile>) -> String {
    let Some(profile) = profile else {
        return FALLBACK_DESCRIPTION.to_string();
    };

    let mut out = String::from("A high quality portrait of a ");
    match profile.age_years {
        Some(age) => out.push_str(&format!("{age} year old ")),
        None => out.push_str("adult "),
    }
    match profile.gender {
        Some(gender) => out.push_str(&format!("{}, ", gender.as_str())),
        None => out.push_str("person, "),
    }
    if let Some(skin) = profile.skin_color {
        out.push_str(&format!("{} skin, ", color_name(skin, true)));
    }
    match profile.hair.as_ref() {
        Some(hair) if !hair.style.trim().is_empty() => {
            out.push_str(&format!(
                "{} {} hair, ",
                color_name(hair.color, false),
                hair.style.trim()
            ));
        }
        _ => out.push_str("bald head, "),
    }

    let mut apparel: Vec<&str> = Vec::new();
    for label in &profile.apparel {
        let label = label.trim();
        if !label.is_empty() && !apparel.contains(&label) {
            apparel.push(label);
        }
    }
    if apparel.is_empty() {
        out.push_str("wearing simple clothes");
    } else {
        out.push_str(&format!("wearing {}", apparel.join(", ")));
    }

    out.push_str(". Artstation style.");
    out
}

const SKIN_PALETTE: [(&str, Color); 7] = [
    ("pale", Color::new(0.95, 0.9, 0.9)),
    ("fair", Color::new(1.0, 0.8, 0.6)),
    ("light tan", Color::new(0.9, 0.7, 0.5)),
    ("tanned", Color::new(0.8, 0.6, 0.4)),
    ("brown", Color::new(0.5, 0.35, 0.2)),
    ("dark brown", Color::new(0.3, 0.2, 0.1)),
    ("black", Color::new(0.2, 0.2, 0.2)),
];

const GENERAL_PALETTE: [(&str, Color); 15] = [
    ("white", Color::new(1.0, 1.0, 1.0)),
    ("black", Color::new(0.0, 0.0, 0.0)),
    ("grey", Color::new(0.5, 0.5, 0.5)),
    ("red", Color::new(1.0, 0.0, 0.0)),
    ("green", Color::new(0.0, 1.0, 0.0)),
    ("blue", Color::new(0.0, 0.0, 1.0)),
    ("yellow", Color::new(1.0, 0.92, 0.016)),
    ("cyan", Color::new(0.0, 1.0, 1.0)),
    ("magenta", Color::new(1.0, 0.0, 1.0)),
    ("brown", Color::new(0.5, 0.35, 0.2)),
    ("blonde", Color::new(1.0, 0.9, 0.6)),
    ("orange", Color::new(1.0, 0.5, 0.0)),
    ("pink", Color::new(1.0, 0.7, 0.8)),
    ("purple", Color::new(0.5, 0.0, 0.5)),
    ("teal", Color::new(0.0, 0.5, 0.5)),
];

fn color_name(color: Color, is_skin: bool) -> &'static str {
    if is_skin {
        if let Some((name, _)) = SKIN_PALETTE
            .iter()
            .find(|(_, swatch)| color.distance(*swatch) < SKIN_TOLERANCE)
        {
            return name;
        }
    }

    let mut closest = "colored";
    let mut min_distance = f32::MAX;
    for (name, swatch) in GENERAL_PALETTE {
        let distance = color.distance(swatch);
        if distance < min_distance {
            min_distance = distance;
            closest = name;
        }
    }

    // Non-human skin tones: describe by brightness when nothing is close.
    if is_skin && min_distance > SKIN_FALLBACK_DISTANCE {
        let brightness = color.grayscale();
        if brightness > 0.8 {
            return "pale";
        }
        if brightness < 0.2 {
            return "dark";
        }
    }
    closest
}

#[cfg(test)]
mod tests {
    use super::{color_name, describe, CharacterProfile, Color, Gender, HairDescription};

    #[test]
    fn missing_profile_uses_fallback() {
        assert_eq!(
            describe(None),
            "A high quality portrait of a mysterious figure. Artstation style."
        );
    }

    #[test]
    fn full_profile_reads_naturally() {
        let profile = CharacterProfile {
            age_years: Some(25),
            gender: Some(Gender::Female),
            skin_color: Some(Color::new(1.0, 0.8, 0.6)),
            hair: Some(HairDescription {
                color: Color::new(1.0, 0.9, 0.6),
                style: "Curly".to_string(),
            }),
            apparel: vec![
                "tribalwear".to_string(),
                "cowboy hat".to_string(),
                "tribalwear".to_string(),
            ],
        };
        assert_eq!(
            describe(Some(&profile)),
            "A high quality portrait of a 25 year old female, fair skin, blonde Curly hair, \
             wearing tribalwear, cowboy hat. Artstation style."
        );
    }

    #[test]
    fn sparse_profile_uses_neutral_wording() {
        let profile = CharacterProfile::default();
        assert_eq!(
            describe(Some(&profile)),
            "A high quality portrait of a adult person, bald head, wearing simple clothes. \
             Artstation style."
        );
    }

    #[test]
    fn exotic_skin_falls_back_to_brightness() {
        assert_eq!(color_name(Color::new(0.95, 0.95, 0.92), true), "pale");
        assert_eq!(color_name(Color::new(0.3, 0.2, 0.1), true), "dark brown");
        assert_eq!(color_name(Color::new(0.05, 0.1, 0.3), true), "dark");
        assert_eq!(color_name(Color::new(0.2, 0.8, 0.2), true), "green");
    }

    #[test]
    fn hair_uses_general_palette() {
        assert_eq!(color_name(Color::new(0.9, 0.1, 0.05), false), "red");
        assert_eq!(color_name(Color::new(0.45, 0.33, 0.2), false), "brown");
    }

    #[test]
    fn profile_deserializes_from_partial_json() -> anyhow::Result<()> {
        let profile: CharacterProfile =
            serde_json::from_str(r#"{"age_years": 40, "gender": "male", "apparel": ["duster"]}"#)?;
        assert_eq!(profile.age_years, Some(40));
        assert_eq!(profile.gender, Some(Gender::Male));
        assert!(profile.hair.is_none());
        Ok(())
    }
}
