// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Namespace-agnostic helpers over `roxmltree`.
//!
//! Broadcast signaling mixes default and prefixed namespaces freely, so
//! elements and attributes are matched on their local name only.

use roxmltree::{Document, Node};

use crate::error::{Error, Result};

pub(crate) fn parse(text: &str) -> Result<Document<'_>> {
    Document::parse(text).map_err(|e| Error::signaling(format!("invalid XML: {}", e)))
}

pub(crate) fn is(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

pub(crate) fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |n| is(n, name))
}

pub(crate) fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is(n, name))
}

/// Attribute by local name.
pub(crate) fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name() == name)
        .map(|a| a.value())
}

/// Attribute by local name, ASCII case-insensitive.
pub(crate) fn attr_nocase<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name().eq_ignore_ascii_case(name))
        .map(|a| a.value())
}

pub(crate) fn attr_u32(node: Node<'_, '_>, name: &str) -> Option<u32> {
    attr(node, name).and_then(|v| v.trim().parse().ok())
}

pub(crate) fn attr_u64(node: Node<'_, '_>, name: &str) -> Option<u64> {
    attr(node, name).and_then(|v| v.trim().parse().ok())
}

pub(crate) fn attr_bool(node: Node<'_, '_>, name: &str) -> Option<bool> {
    attr(node, name).map(|v| matches!(v.trim(), "true" | "1"))
}

/// Trimmed text content of an element.
pub(crate) fn text<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.text().map(str::trim).filter(|t| !t.is_empty())
}

/// Text of the first child element with the given name.
pub(crate) fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(text)
}
