//! Artifact naming conventions shared by the store, the invocations, and the
//! poller's selectors. The formats here are read by other services and must
//! stay bit-exact.

use chrono::{DateTime, Local};

pub const GENERATED_PREFIX: &str = "image_";
pub const EDITED_PREFIX: &str = "edited_";
pub const DEFAULT_MEDIA_TYPE: &str = "image/png";

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
];

/// `image_<%Y%m%d_%H%M%S_%6f>_<random8>`, the stem shared by one request's
/// composites.
pub fn generation_stem(now: DateTime<Local>, random: &str) -> String {
    let disambiguator: String = random.chars().filter(|c| *c != '-').take(8).collect();
    format!(
        "{GENERATED_PREFIX}{}_{disambiguator}",
        now.format("%Y%m%d_%H%M%S_%6f")
    )
}

/// Composite `i` (1-based) of a generation request.
pub fn composite_name(stem: &str, index: usize) -> String {
    format!("{stem}_{index}.png")
}

/// Quadrant `ordinal` (1..=4, row-major) of a composite.
pub fn quadrant_name(composite: &str, ordinal: usize) -> String {
    let (base, ext) = split_name(composite);
    match ext {
        Some(ext) => format!("{base}_{ordinal}.{ext}"),
        None => format!("{base}_{ordinal}"),
    }
}

/// `edited_<%Y%m%d_%H%M%S>_<source stem>.<source ext>`.
pub fn edited_name(now: DateTime<Local>, source: &str) -> String {
    let (base, ext) = split_name(source);
    let stamp = now.format("%Y%m%d_%H%M%S");
    match ext {
        Some(ext) => format!("{EDITED_PREFIX}{stamp}_{base}.{ext}"),
        None => format!("{EDITED_PREFIX}{stamp}_{base}"),
    }
}

pub fn is_edited(name: &str) -> bool {
    name.starts_with(EDITED_PREFIX)
}

pub fn media_type_for(name: &str) -> &'static str {
    extension(name)
        .and_then(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_MEDIA_TYPE)
}

pub fn is_image_name(name: &str) -> bool {
    extension(name)
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|(known, _)| *known == ext))
        .unwrap_or(false)
}

/// A bare file name: no separators, no parent references, not empty.
pub fn is_plain_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed == name
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

fn extension(name: &str) -> Option<String> {
    split_name(name).1.map(|ext| ext.to_ascii_lowercase())
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;

    fn fixed_time() -> chrono::DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 3, 14, 9, 26, 53)
            .single()
            .unwrap_or_else(Local::now)
    }

    #[test]
    fn generated_names_follow_interop_format() {
        let stem = generation_stem(fixed_time(), "1a2b3c4d-9999-4aaa-8bbb-cccccccccccc");
        assert_eq!(stem, "image_20250314_092653_000000_1a2b3c4d");
        let composite = composite_name(&stem, 1);
        assert_eq!(composite, "image_20250314_092653_000000_1a2b3c4d_1.png");
        assert_eq!(
            quadrant_name(&composite, 3),
            "image_20250314_092653_000000_1a2b3c4d_1_3.png"
        );
    }

    #[test]
    fn edited_names_carry_source_stem_and_extension() {
        let name = edited_name(fixed_time(), "look_2.jpg");
        assert_eq!(name, "edited_20250314_092653_look_2.jpg");
        assert!(is_edited(&name));
        assert!(!is_edited("image_20250314_1.png"));
    }

    #[test]
    fn media_type_defaults_to_png() {
        assert_eq!(media_type_for("a.JPG"), "image/jpeg");
        assert_eq!(media_type_for("a.webp"), "image/webp");
        assert_eq!(media_type_for("a.tiff"), DEFAULT_MEDIA_TYPE);
        assert_eq!(media_type_for("noext"), DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn only_known_extensions_are_images() {
        assert!(is_image_name("x.png"));
        assert!(is_image_name("x.jpeg"));
        assert!(!is_image_name("events.jsonl"));
        assert!(!is_image_name(".png"));
    }

    #[test]
    fn plain_names_reject_traversal() {
        assert!(is_plain_name("image_1.png"));
        assert!(!is_plain_name("../secret.png"));
        assert!(!is_plain_name("dir/image.png"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name(" padded.png"));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("..\\secret.png"));
    }

    #[test]
    fn doubled_dots_inside_a_name_are_allowed() {
        assert!(is_plain_name("look..v2.png"));
        assert!(is_plain_name("..hidden.png"));
    }
}
