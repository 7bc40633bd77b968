//! Tag normalisation and pruning applied before tags are rendered as hashtags.
use std::collections::HashSet;

use once_cell::sync::Lazy;

pub const DEFAULT_LIMIT: usize = 10;

/// Low-information tags: counting tags, image metadata, and generic
/// body/clothing/setting nouns. Stored in normalised form.
static DENY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // counting
        "solo",
        "solo_focus",
        "1girl",
        "1boy",
        "multiple_girls",
        "multiple_boys",
        "no_humans",
        // resolution / background / commentary / id metadata
        "highres",
        "absurdres",
        "lowres",
        "incredibly_absurdres",
        "huge_filesize",
        "simple_background",
        "white_background",
        "transparent_background",
        "gradient_background",
        "grey_background",
        "commentary",
        "commentary_request",
        "english_commentary",
        "translation_request",
        "translated",
        "artist_name",
        "signature",
        "watermark",
        "web_address",
        "dated",
        "username",
        "twitter_username",
        "pixiv_id",
        "bad_id",
        "bad_pixiv_id",
        "bad_twitter_id",
        "md5_mismatch",
        "tagme",
        "official_art",
        // generic body / clothing / setting nouns
        "looking_at_viewer",
        "smile",
        "blush",
        "open_mouth",
        "closed_mouth",
        "hair",
        "long_hair",
        "short_hair",
        "eyes",
        "bangs",
        "breasts",
        "hand",
        "hands",
        "upper_body",
        "full_body",
        "cowboy_shot",
        "shirt",
        "skirt",
        "dress",
        "jacket",
        "long_sleeves",
        "short_sleeves",
        "standing",
        "sitting",
        "outdoors",
        "indoors",
        "day",
        "night",
        "sky",
        "cloud",
    ]
    .into_iter()
    .collect()
});

/// Normalise, prune and dedupe a raw tag list, keeping first occurrences in
/// order, at most `limit`.
pub fn filter<S: AsRef<str>>(tags: &[S], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter_map(|t| normalize(t.as_ref()))
        .filter(|t| !is_denied(t))
        .filter(|t| seen.insert(t.clone()))
        .take(limit)
        .collect()
}

/// Trim, strip a leading `#`/`:`, lowercase, and turn spaces/hyphens into
/// underscores. `None` when fewer than two characters remain.
pub fn normalize(tag: &str) -> Option<String> {
    let trimmed = tag
        .trim_start_matches(|c: char| c == '#' || c == ':' || c.is_whitespace())
        .trim_end();
    if trimmed.chars().count() < 2 {
        return None;
    }
    Some(
        trimmed
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect(),
    )
}

/// True for deny-listed tags and count-prefixed tags such as `2girls`.
pub fn is_denied(normalized: &str) -> bool {
    DENY.contains(normalized)
        || normalized
            .chars()
            .next()
            .map_or(true, |c| c.is_ascii_digit())
}

/// Render tags as space-separated hashtags.
pub fn hashtags<S: AsRef<str>>(tags: &[S]) -> String {
    tags.iter()
        .map(|t| format!("#{}", t.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(tags: &[&str]) -> Vec<String> {
        filter(tags, DEFAULT_LIMIT)
    }

    #[test]
    fn normalizes_case_spaces_and_hyphens() {
        assert_eq!(
            f(&["Cherry Blossoms", "  #night-sky ", ":Hatsune Miku"]),
            vec!["cherry_blossoms", "night_sky", "hatsune_miku"]
        );
    }

    #[test]
    fn drops_short_denied_and_count_prefixed() {
        assert_eq!(
            f(&[
                "a",
                "#",
                "  ",
                "1girl",
                "2girls",
                "3d",
                "HighRes",
                "Simple Background",
                "katana"
            ]),
            vec!["katana"]
        );
    }

    #[test]
    fn duplicates_after_normalisation_are_dropped() {
        assert_eq!(
            f(&["Cat", "cat", "#night-sky", "Night Sky", "cat"]),
            vec!["cat", "night_sky"]
        );
        assert_eq!(filter(&["fox", "Fox", "tree", "sky"], 2), vec!["fox", "tree"]);
    }

    #[test]
    fn keeps_order_and_truncates_to_limit() {
        let tags: Vec<String> = (0..30).map(|i| format!("tag_{i:02}")).collect();
        let out = filter(&tags, 5);
        assert_eq!(out, vec!["tag_00", "tag_01", "tag_02", "tag_03", "tag_04"]);
        assert!(filter(&tags, 0).is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let samples: Vec<Vec<&str>> = vec![
            vec!["Sword", "solo", "#Red-Eyes", "4koma", "x", "sunset", "Absurdres"],
            vec!["::double colon", "##hash", "# #nested", "MIXED Case-Tag", "ok"],
            vec![],
            vec!["1boy", "2boys", "long hair", "white background"],
            vec!["Cat", "cat", "#CAT", "Long-Hair", "long hair"],
        ];
        for sample in samples {
            for limit in [0, 1, 3, DEFAULT_LIMIT] {
                let once = filter(&sample, limit);
                let twice = filter(&once, limit);
                assert_eq!(once, twice, "sample {sample:?} limit {limit}");
                assert!(once.len() <= limit);
                assert!(once.iter().all(|t| !DENY.contains(t.as_str())));
            }
        }
    }

    #[test]
    fn hashtags_are_space_separated() {
        assert_eq!(hashtags(&["a_b", "cat"]), "#a_b #cat");
        assert_eq!(hashtags::<&str>(&[]), "");
    }
}
