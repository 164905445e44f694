use std::str::FromStr;

use xmltree::{Element, XMLNode};

use crate::error::ColladaError;

pub(super) fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

pub(super) fn children<'a>(
    element: &'a Element,
    name: &'a str,
) -> impl Iterator<Item = &'a Element> {
    child_elements(element).filter(move |child| child.name == name)
}

pub(super) fn child<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    element.get_child(name)
}

/// Depth-first search for the first descendant with the given name.
pub(super) fn descendant<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    for candidate in child_elements(element) {
        if candidate.name == name {
            return Some(candidate);
        }
        if let Some(found) = descendant(candidate, name) {
            return Some(found);
        }
    }
    None
}

pub(super) fn attr<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element.attributes.get(name).map(String::as_str)
}

pub(super) fn text(element: &Element) -> String {
    element
        .get_text()
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

/// Strip the `#` of a local URI fragment.
pub(super) fn url_id(url: &str) -> &str {
    url.strip_prefix('#').unwrap_or(url)
}

fn parse_list<T: FromStr>(element: &Element) -> Result<Vec<T>, ColladaError> {
    text(element)
        .split_whitespace()
        .map(|token| {
            token.parse::<T>().map_err(|_| {
                ColladaError::DocumentParse(format!(
                    "invalid value '{}' in <{}>",
                    token, element.name
                ))
            })
        })
        .collect()
}

pub(super) fn parse_floats(element: &Element) -> Result<Vec<f32>, ColladaError> {
    parse_list(element)
}

pub(super) fn parse_uints(element: &Element) -> Result<Vec<u32>, ColladaError> {
    parse_list(element)
}

pub(super) fn parse_ints(element: &Element) -> Result<Vec<i64>, ColladaError> {
    parse_list(element)
}

pub(super) fn parse_float(element: &Element) -> Option<f32> {
    text(element).parse().ok()
}

pub(super) fn parse_fixed<const N: usize>(element: &Element) -> Result<[f32; N], ColladaError> {
    let values = parse_floats(element)?;
    values.try_into().map_err(|values: Vec<f32>| {
        ColladaError::DocumentParse(format!(
            "<{}> expects {} values, found {}",
            element.name,
            N,
            values.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_nested_elements_when_searching_descendant_then_first_match_is_found() {
        let element = Element::parse(
            r#"<a><b><c id="1"/></b><c id="2"/></a>"#.as_bytes(),
        )
        .expect("parse");

        let found = descendant(&element, "c").expect("descendant");
        assert_eq!(attr(found, "id"), Some("1"));
    }

    #[test]
    fn given_bad_float_when_parsing_list_then_error_names_element() {
        let element = Element::parse("<float_array>1 2 x</float_array>".as_bytes()).expect("parse");
        let error = parse_floats(&element).expect_err("invalid token");
        assert!(error.to_string().contains("float_array"));
    }

    #[test]
    fn given_wrong_arity_when_parsing_fixed_then_error_is_returned() {
        let element = Element::parse("<translate>1 2</translate>".as_bytes()).expect("parse");
        assert!(parse_fixed::<3>(&element).is_err());
    }
}
