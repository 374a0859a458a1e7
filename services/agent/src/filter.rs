//! Path-filtered data item selection
//!
//! Clients restrict `current` and `sample` queries with a path expression
//! over the device tree: `//Device[@name='mill-1']//Axes//DataItem[@type='POSITION']`.
//! Steps are separated by `//`; each step names a component type, `Device`,
//! `DataItem` or `*`, with optional `[@attr='value']` predicates joined by
//! `and`. The expression resolves to the set of data item ids it selects.

use std::sync::Arc;

use agent_buffer::FilterSet;
use agent_types::device::Component;
use agent_types::{DataItem, DataItemCategory, Device};

#[derive(Debug, Clone, PartialEq)]
struct Step {
    name: String,
    predicates: Vec<(String, String)>,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFilter {
    steps: Vec<Step>,
}

impl PathFilter {
    /// Parse a path expression; returns a readable reason on failure.
    pub fn parse(path: &str) -> Result<PathFilter, String> {
        let path = path.trim();
        if path.is_empty() {
            return Err("empty path".to_string());
        }
        let stripped = path
            .strip_prefix("//")
            .ok_or_else(|| format!("path must start with '//': {path}"))?;

        let mut steps = Vec::new();
        for part in stripped.split("//") {
            if part.is_empty() {
                return Err(format!("empty step in path: {path}"));
            }
            steps.push(parse_step(part)?);
        }
        Ok(PathFilter { steps })
    }

    /// Resolve the expression to the data item ids it selects.
    pub fn filter_ids(&self, devices: &[Arc<Device>]) -> FilterSet {
        let mut out = FilterSet::new();
        for device in devices {
            self.select_device(device, &mut out);
        }
        out
    }

    fn select_device(&self, device: &Arc<Device>, out: &mut FilterSet) {
        let mut steps = self.steps.as_slice();

        // A leading Device step constrains which devices participate.
        if let Some(first) = steps.first() {
            if first.name == "Device" || first.name == "Agent" {
                if !device_matches(device, &first.predicates) {
                    return;
                }
                steps = &steps[1..];
            }
        }

        if steps.is_empty() {
            collect_all(device.root(), out);
            return;
        }
        select_from(device.root(), steps, out);
    }
}

fn parse_step(text: &str) -> Result<Step, String> {
    let text = text.trim();
    let (name, rest) = match text.find('[') {
        None => (text, None),
        Some(open) => {
            let close = text
                .rfind(']')
                .ok_or_else(|| format!("unterminated predicate in '{text}'"))?;
            (&text[..open], Some(&text[open + 1..close]))
        }
    };
    if name.is_empty() {
        return Err(format!("step without a name: '{text}'"));
    }

    let mut predicates = Vec::new();
    if let Some(rest) = rest {
        for clause in rest.split(" and ") {
            let clause = clause.trim();
            let stripped = clause
                .strip_prefix('@')
                .ok_or_else(|| format!("predicate must start with '@': '{clause}'"))?;
            let (attr, value) = stripped
                .split_once('=')
                .ok_or_else(|| format!("predicate must be '@attr=value': '{clause}'"))?;
            let value = value.trim().trim_matches('\'').trim_matches('"');
            predicates.push((attr.trim().to_string(), value.to_string()));
        }
    }
    Ok(Step {
        name: name.to_string(),
        predicates,
    })
}

fn device_matches(device: &Device, predicates: &[(String, String)]) -> bool {
    predicates.iter().all(|(attr, value)| match attr.as_str() {
        "name" => device.name() == value,
        "uuid" => device.uuid() == value,
        _ => false,
    })
}

fn data_item_matches(item: &DataItem, predicates: &[(String, String)]) -> bool {
    predicates.iter().all(|(attr, value)| match attr.as_str() {
        "id" => item.id() == value,
        "name" => item.name() == Some(value.as_str()),
        "type" => item.item_type() == value,
        "subType" => item.sub_type() == Some(value.as_str()),
        "category" => match item.category() {
            DataItemCategory::Sample => value == "SAMPLE",
            DataItemCategory::Event => value == "EVENT",
            DataItemCategory::Condition => value == "CONDITION",
        },
        _ => false,
    })
}

fn component_matches(component: &Component, step: &Step) -> bool {
    if step.name != "*" && component.component_type() != step.name {
        return false;
    }
    step.predicates.iter().all(|(attr, value)| match attr.as_str() {
        "id" => component.id() == value,
        "name" => component.name() == Some(value.as_str()),
        _ => false,
    })
}

/// Walk down from `node` consuming steps as descendants match.
fn select_from(node: &Component, steps: &[Step], out: &mut FilterSet) {
    let Some(step) = steps.first() else {
        return;
    };

    if step.name == "DataItem" {
        collect_matching_items(node, step, out);
        return;
    }

    for child in node.children() {
        if component_matches(child, step) {
            if steps.len() == 1 {
                collect_all(child, out);
            } else {
                select_from(child, &steps[1..], out);
            }
        }
        // Descendant steps may match deeper regardless.
        select_from(child, steps, out);
    }
}

fn collect_matching_items(node: &Component, step: &Step, out: &mut FilterSet) {
    for item in node.data_items() {
        if data_item_matches(item, &step.predicates) {
            out.insert(item.id().to_string());
        }
    }
    for child in node.children() {
        collect_matching_items(child, step, out);
    }
}

fn collect_all(node: &Component, out: &mut FilterSet) {
    for item in node.data_items() {
        out.insert(item.id().to_string());
    }
    for child in node.children() {
        collect_all(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_types::device::DataItem;

    fn model() -> Vec<Arc<Device>> {
        let mut x = Component::new("x", "Linear").with_name("X");
        x.add_data_item(
            DataItem::builder("x1", DataItemCategory::Sample)
                .item_type("POSITION")
                .build()
                .unwrap(),
        );
        let mut y = Component::new("y", "Linear").with_name("Y");
        y.add_data_item(
            DataItem::builder("y1", DataItemCategory::Sample)
                .item_type("POSITION")
                .build()
                .unwrap(),
        );
        let mut axes = Component::new("ax", "Axes");
        axes.add_child(x);
        axes.add_child(y);

        let mut root = Component::new("dev", "Device").with_name("mill-1");
        root.add_data_item(
            DataItem::builder("avail", DataItemCategory::Event)
                .item_type("AVAILABILITY")
                .build()
                .unwrap(),
        );
        root.add_child(axes);
        vec![Arc::new(Device::new("uuid-1", "mill-1", root).unwrap())]
    }

    #[test]
    fn selects_by_data_item_type() {
        let filter = PathFilter::parse("//DataItem[@type='POSITION']").unwrap();
        let ids = filter.filter_ids(&model());
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("x1") && ids.contains("y1"));
    }

    #[test]
    fn selects_a_component_subtree() {
        let filter = PathFilter::parse("//Linear[@name='X']").unwrap();
        let ids = filter.filter_ids(&model());
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("x1"));
    }

    #[test]
    fn device_predicate_constrains_devices() {
        let filter = PathFilter::parse("//Device[@name='other']//DataItem").unwrap();
        assert!(filter.filter_ids(&model()).is_empty());

        let filter = PathFilter::parse("//Device[@name='mill-1']//Axes").unwrap();
        let ids = filter.filter_ids(&model());
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn nested_steps_compose() {
        let filter =
            PathFilter::parse("//Axes//DataItem[@type='POSITION' and @id='y1']").unwrap();
        let ids = filter.filter_ids(&model());
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("y1"));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(PathFilter::parse("").is_err());
        assert!(PathFilter::parse("Device").is_err());
        assert!(PathFilter::parse("//DataItem[@type]").is_err());
        assert!(PathFilter::parse("//DataItem[type='X']").is_err());
    }
}
