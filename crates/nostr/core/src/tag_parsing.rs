//! Helpers for reading event tags.
//!
//! Tags are small string arrays where the first element names the tag and
//! the second carries its primary value; trailing elements are positional
//! extras (relay hints, markers).

/// Name of a tag, i.e. its first element.
pub fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

/// Whether a tag has the given name.
pub fn is_tag(tag: &[String], name: &str) -> bool {
    matches!(tag_name(tag), Some(tag_name) if tag_name == name)
}

/// First tag with the given name that carries a value.
pub fn find_tag<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a [String]> {
    tags.iter()
        .find(|tag| is_tag(tag, name) && tag.get(1).is_some())
        .map(Vec::as_slice)
}

/// Value of the first tag with the given name.
pub fn find_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    find_tag(tags, name).and_then(|tag| tag.get(1).map(String::as_str))
}

/// Values of every tag with the given name.
pub fn collect_tag_values(tags: &[Vec<String>], name: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| is_tag(tag, name))
        .filter_map(|tag| tag.get(1).cloned())
        .collect()
}
