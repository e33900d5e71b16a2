//! Small accessors over KDL nodes.
//!
//! Settings are written as child nodes with a single argument,
//! e.g. `binary "/usr/sbin/haproxy"`.

use kdl::{KdlNode, KdlValue};

/// First positional argument of a node
pub fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// First positional argument of a node, as a string
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    first_arg(node)?.as_string().map(str::to_string)
}

fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|c| c.name().value() == name)
}

/// String argument of the named child node
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    get_first_arg_string(child(node, name)?)
}

/// Integer argument of the named child node
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    first_arg(child(node, name)?)?.as_integer()
}

/// Arguments of every child node with the given name, in order
pub fn get_repeated_strings(node: &KdlNode, name: &str) -> Vec<String> {
    node.children()
        .map(|doc| {
            doc.nodes()
                .iter()
                .filter(|c| c.name().value() == name)
                .filter_map(get_first_arg_string)
                .collect()
        })
        .unwrap_or_default()
}
