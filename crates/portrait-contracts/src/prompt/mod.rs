mod description;
mod modifiers;

pub use description::{describe, CharacterProfile, Color, Gender, HairDescription};
pub use modifiers::{
    apply_composition, apply_style, apply_style_reference, ART_STYLES, COMPOSITIONS,
    DEFAULT_ART_STYLE, DEFAULT_COMPOSITION,
};
