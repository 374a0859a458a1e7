//! Data items: the named telemetry channels a device declares

use super::units::UnitConversion;
use crate::error::{EntityError, ErrorList, PropertyError};

/// The category of values a data item produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItemCategory {
    Sample,
    Event,
    Condition,
}

impl DataItemCategory {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "SAMPLE" => Some(Self::Sample),
            "EVENT" => Some(Self::Event),
            "CONDITION" => Some(Self::Condition),
            _ => None,
        }
    }
}

/// How the data item's value is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Representation {
    #[default]
    Value,
    DataSet,
    Table,
    TimeSeries,
}

impl Representation {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "VALUE" => Some(Self::Value),
            "DATA_SET" => Some(Self::DataSet),
            "TABLE" => Some(Self::Table),
            "TIME_SERIES" => Some(Self::TimeSeries),
            _ => None,
        }
    }
}

/// Minimum-delta and period filters declared on a data item.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataItemFilter {
    /// Drop samples changing less than this from the last reported value.
    pub minimum_delta: Option<f64>,
    /// Rate-limit to one observation per period, in seconds.
    pub period: Option<f64>,
}

/// A declared telemetry channel.
///
/// Created at device-model load; replaced wholesale when the model is
/// updated. Identity is the `id`, which is unique across the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    id: String,
    name: Option<String>,
    item_type: String,
    sub_type: Option<String>,
    category: DataItemCategory,
    representation: Representation,
    units: Option<String>,
    native_units: Option<String>,
    native_scale: Option<f64>,
    statistic: Option<String>,
    constant_value: Option<String>,
    discrete: bool,
    filter: DataItemFilter,
    data_source: Option<String>,
    device_uuid: Option<String>,
    converter: Option<UnitConversion>,
}

impl DataItem {
    pub fn builder(id: impl Into<String>, category: DataItemCategory) -> DataItemBuilder {
        DataItemBuilder::new(id, category)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.sub_type.as_deref()
    }

    pub fn category(&self) -> DataItemCategory {
        self.category
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn native_units(&self) -> Option<&str> {
        self.native_units.as_deref()
    }

    pub fn statistic(&self) -> Option<&str> {
        self.statistic.as_deref()
    }

    pub fn constant_value(&self) -> Option<&str> {
        self.constant_value.as_deref()
    }

    pub fn filter(&self) -> &DataItemFilter {
        &self.filter
    }

    /// The adapter identity this item is bound to, when any.
    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    pub fn set_data_source(&mut self, source: impl Into<String>) {
        self.data_source = Some(source.into());
    }

    pub fn device_uuid(&self) -> Option<&str> {
        self.device_uuid.as_deref()
    }

    pub(crate) fn set_device_uuid(&mut self, uuid: impl Into<String>) {
        self.device_uuid = Some(uuid.into());
    }

    pub fn is_sample(&self) -> bool {
        self.category == DataItemCategory::Sample
    }

    pub fn is_event(&self) -> bool {
        self.category == DataItemCategory::Event
    }

    pub fn is_condition(&self) -> bool {
        self.category == DataItemCategory::Condition
    }

    pub fn is_data_set(&self) -> bool {
        matches!(
            self.representation,
            Representation::DataSet | Representation::Table
        )
    }

    pub fn is_table(&self) -> bool {
        self.representation == Representation::Table
    }

    pub fn is_time_series(&self) -> bool {
        self.representation == Representation::TimeSeries
    }

    pub fn is_discrete(&self) -> bool {
        self.discrete
    }

    pub fn is_three_space(&self) -> bool {
        self.item_type == "PATH_POSITION"
            || self
                .units
                .as_deref()
                .map(|u| u.ends_with("_3D"))
                .unwrap_or(false)
    }

    pub fn is_availability(&self) -> bool {
        self.item_type == "AVAILABILITY"
    }

    pub fn is_asset_changed(&self) -> bool {
        self.item_type == "ASSET_CHANGED"
    }

    pub fn is_asset_removed(&self) -> bool {
        self.item_type == "ASSET_REMOVED"
    }

    pub fn is_asset_count(&self) -> bool {
        self.item_type == "ASSET_COUNT"
    }

    pub fn conversion(&self) -> Option<&UnitConversion> {
        self.converter.as_ref()
    }

    /// Convert a raw value from native units, when a conversion applies.
    pub fn convert(&self, value: f64) -> f64 {
        match &self.converter {
            Some(conv) => conv.convert(value),
            None => value,
        }
    }

    /// The entity name observations of this item carry, derived from the
    /// item type (`ASSET_CHANGED` → `AssetChanged`).
    pub fn observation_name(&self) -> String {
        let mut out = String::with_capacity(self.item_type.len());
        for part in self.item_type.split('_') {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.extend(chars.map(|c| c.to_ascii_lowercase()));
            }
        }
        out
    }
}

/// Builder for [`DataItem`]; computes the unit converter at build time.
#[derive(Debug, Clone)]
pub struct DataItemBuilder {
    item: DataItem,
}

impl DataItemBuilder {
    fn new(id: impl Into<String>, category: DataItemCategory) -> Self {
        Self {
            item: DataItem {
                id: id.into(),
                name: None,
                item_type: String::new(),
                sub_type: None,
                category,
                representation: Representation::Value,
                units: None,
                native_units: None,
                native_scale: None,
                statistic: None,
                constant_value: None,
                discrete: false,
                filter: DataItemFilter::default(),
                data_source: None,
                device_uuid: None,
                converter: None,
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.item.name = Some(name.into());
        self
    }

    pub fn item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item.item_type = item_type.into();
        self
    }

    pub fn sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.item.sub_type = Some(sub_type.into());
        self
    }

    pub fn representation(mut self, representation: Representation) -> Self {
        self.item.representation = representation;
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.item.units = Some(units.into());
        self
    }

    pub fn native_units(mut self, native_units: impl Into<String>) -> Self {
        self.item.native_units = Some(native_units.into());
        self
    }

    pub fn native_scale(mut self, scale: f64) -> Self {
        self.item.native_scale = Some(scale);
        self
    }

    pub fn statistic(mut self, statistic: impl Into<String>) -> Self {
        self.item.statistic = Some(statistic.into());
        self
    }

    pub fn constant_value(mut self, value: impl Into<String>) -> Self {
        self.item.constant_value = Some(value.into());
        self
    }

    pub fn discrete(mut self, discrete: bool) -> Self {
        self.item.discrete = discrete;
        self
    }

    pub fn minimum_delta(mut self, delta: f64) -> Self {
        self.item.filter.minimum_delta = Some(delta);
        self
    }

    pub fn period(mut self, period: f64) -> Self {
        self.item.filter.period = Some(period);
        self
    }

    pub fn data_source(mut self, source: impl Into<String>) -> Self {
        self.item.data_source = Some(source.into());
        self
    }

    pub fn build(mut self) -> Result<DataItem, EntityError> {
        let mut errors = ErrorList::new();
        if self.item.id.is_empty() {
            errors.push(PropertyError::Missing {
                property: "id".to_string(),
            });
        }
        if self.item.item_type.is_empty() {
            errors.push(PropertyError::Missing {
                property: "type".to_string(),
            });
        }
        if !errors.is_empty() {
            return Err(EntityError::Invalid {
                name: "DataItem".to_string(),
                errors,
            });
        }

        if let (Some(native), Some(units)) = (&self.item.native_units, &self.item.units) {
            self.item.converter = UnitConversion::create(native, units);
        }
        if let Some(scale) = self.item.native_scale {
            let base = self.item.converter.unwrap_or(UnitConversion::IDENTITY);
            self.item.converter = Some(base.scaled(scale));
        }

        Ok(self.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_computes_converter() {
        let item = DataItem::builder("x1", DataItemCategory::Sample)
            .item_type("POSITION")
            .units("MILLIMETER")
            .native_units("FOOT")
            .build()
            .unwrap();
        assert_eq!(item.convert(1.0), 304.8);
    }

    #[test]
    fn native_scale_composes_with_conversion() {
        let item = DataItem::builder("x1", DataItemCategory::Sample)
            .item_type("LOAD")
            .units("PERCENT")
            .native_scale(10.0)
            .build()
            .unwrap();
        assert_eq!(item.convert(250.0), 25.0);
    }

    #[test]
    fn observation_name_is_pascal_case() {
        let item = DataItem::builder("a1", DataItemCategory::Event)
            .item_type("ASSET_CHANGED")
            .build()
            .unwrap();
        assert_eq!(item.observation_name(), "AssetChanged");
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(DataItem::builder("a1", DataItemCategory::Event).build().is_err());
    }
}
