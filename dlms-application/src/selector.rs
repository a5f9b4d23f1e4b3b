//! Selective access parameters for buffer-like attributes

use crate::error::{DlmsError, DlmsResult};
use dlms_core::{CosemDateFormat, CosemDateTime, DataObject, ObisCode};

pub const SELECTOR_BY_RANGE: u8 = 1;
pub const SELECTOR_BY_ENTRY: u8 = 2;

/// Column of a profile: the capture object definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureObjectDefinition {
    pub class_id: u16,
    pub logical_name: ObisCode,
    pub attribute_index: i8,
    /// 0 selects the whole attribute
    pub data_index: u16,
}

impl CaptureObjectDefinition {
    pub fn new(class_id: u16, logical_name: ObisCode, attribute_index: i8) -> Self {
        Self {
            class_id,
            logical_name,
            attribute_index,
            data_index: 0,
        }
    }

    /// Attribute 2 of the clock object 0.0.1.0.0.255
    pub fn clock() -> Self {
        Self::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2)
    }

    pub fn to_data_object(&self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::Unsigned16(self.class_id),
            DataObject::OctetString(self.logical_name.to_bytes().to_vec()),
            DataObject::Integer8(self.attribute_index),
            DataObject::Unsigned16(self.data_index),
        ])
    }

    pub fn from_data_object(value: &DataObject) -> DlmsResult<Self> {
        match value.as_structure()? {
            [DataObject::Unsigned16(class_id), DataObject::OctetString(name), DataObject::Integer8(attribute_index), DataObject::Unsigned16(data_index)] => {
                Ok(Self {
                    class_id: *class_id,
                    logical_name: ObisCode::from_bytes(name)?,
                    attribute_index: *attribute_index,
                    data_index: *data_index,
                })
            }
            other => Err(DlmsError::InvalidData(format!(
                "Not a capture object definition: {} elements",
                other.len()
            ))),
        }
    }
}

/// Access selector sent with a Get of a profile buffer
#[derive(Debug, Clone, PartialEq)]
pub enum AccessSelector {
    /// Entries whose `restricting_object` column lies in `from..=to`
    ByRange {
        restricting_object: CaptureObjectDefinition,
        from_value: DataObject,
        to_value: DataObject,
        /// Columns to return, empty for all
        selected_values: Vec<CaptureObjectDefinition>,
    },
    /// Entries `from_entry..=to_entry`, 1-based; `to_entry` 0 means the last
    ByEntry {
        from_entry: u32,
        to_entry: u32,
        from_selected_value: u16,
        /// 0 means up to the last column
        to_selected_value: u16,
    },
    /// Any other selector, carried as is
    Other { selector: u8, parameters: DataObject },
}

impl AccessSelector {
    pub fn by_entry(from_entry: u32, to_entry: u32) -> Self {
        AccessSelector::ByEntry {
            from_entry,
            to_entry,
            from_selected_value: 1,
            to_selected_value: 0,
        }
    }

    pub fn by_range(
        restricting_object: CaptureObjectDefinition,
        from_value: DataObject,
        to_value: DataObject,
    ) -> Self {
        AccessSelector::ByRange {
            restricting_object,
            from_value,
            to_value,
            selected_values: Vec::new(),
        }
    }

    /// Range on the clock column, bounds as 12-byte octet-strings
    pub fn by_time_range(from: &CosemDateTime, to: &CosemDateTime) -> Self {
        Self::by_range(
            CaptureObjectDefinition::clock(),
            DataObject::OctetString(from.encode()),
            DataObject::OctetString(to.encode()),
        )
    }

    pub fn selector_id(&self) -> u8 {
        match self {
            AccessSelector::ByRange { .. } => SELECTOR_BY_RANGE,
            AccessSelector::ByEntry { .. } => SELECTOR_BY_ENTRY,
            AccessSelector::Other { selector, .. } => *selector,
        }
    }

    /// The access-parameters value
    pub fn to_parameters(&self) -> DataObject {
        match self {
            AccessSelector::ByRange {
                restricting_object,
                from_value,
                to_value,
                selected_values,
            } => DataObject::Structure(vec![
                restricting_object.to_data_object(),
                from_value.clone(),
                to_value.clone(),
                DataObject::Array(
                    selected_values
                        .iter()
                        .map(CaptureObjectDefinition::to_data_object)
                        .collect(),
                ),
            ]),
            AccessSelector::ByEntry {
                from_entry,
                to_entry,
                from_selected_value,
                to_selected_value,
            } => DataObject::Structure(vec![
                DataObject::Unsigned32(*from_entry),
                DataObject::Unsigned32(*to_entry),
                DataObject::Unsigned16(*from_selected_value),
                DataObject::Unsigned16(*to_selected_value),
            ]),
            AccessSelector::Other { parameters, .. } => parameters.clone(),
        }
    }

    /// Rebuild a selector from its id and access-parameters
    ///
    /// Selectors 1 and 2 with parameters of an unexpected shape are kept as
    /// [`AccessSelector::Other`], the device decides what they mean.
    pub fn from_parameters(selector: u8, parameters: &DataObject) -> DlmsResult<Self> {
        let parsed = match (selector, parameters) {
            (SELECTOR_BY_RANGE, DataObject::Structure(fields)) if fields.len() == 4 => {
                let columns = fields[3]
                    .as_array()?
                    .iter()
                    .map(CaptureObjectDefinition::from_data_object)
                    .collect::<DlmsResult<Vec<_>>>()?;
                Some(AccessSelector::ByRange {
                    restricting_object: CaptureObjectDefinition::from_data_object(&fields[0])?,
                    from_value: fields[1].clone(),
                    to_value: fields[2].clone(),
                    selected_values: columns,
                })
            }
            (SELECTOR_BY_ENTRY, DataObject::Structure(fields)) => match fields.as_slice() {
                [DataObject::Unsigned32(from), DataObject::Unsigned32(to), DataObject::Unsigned16(first), DataObject::Unsigned16(last)] => {
                    Some(AccessSelector::ByEntry {
                        from_entry: *from,
                        to_entry: *to,
                        from_selected_value: *first,
                        to_selected_value: *last,
                    })
                }
                _ => None,
            },
            _ => None,
        };
        Ok(parsed.unwrap_or_else(|| AccessSelector::Other {
            selector,
            parameters: parameters.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_asn1::encode_data_object;

    #[test]
    fn test_by_entry_parameters_layout() {
        let selector = AccessSelector::by_entry(1, 10);
        assert_eq!(selector.selector_id(), 2);
        assert_eq!(
            encode_data_object(&selector.to_parameters()),
            vec![
                0x02, 0x04, 0x06, 0x00, 0x00, 0x00, 0x01, 0x06, 0x00, 0x00, 0x00, 0x0A, 0x12, 0x00,
                0x01, 0x12, 0x00, 0x00
            ]
        );
        assert_eq!(
            AccessSelector::from_parameters(2, &selector.to_parameters()).unwrap(),
            selector
        );
    }

    #[test]
    fn test_time_range_uses_clock_column() {
        let from = CosemDateTime::new(2016, 2, 22, 4, 16, 39, 0, &[]).unwrap();
        let to = CosemDateTime::new(2016, 2, 22, 5, 16, 39, 0, &[]).unwrap();
        let selector = AccessSelector::by_time_range(&from, &to);
        let parameters = selector.to_parameters();
        let fields = parameters.as_structure().unwrap();
        assert_eq!(
            fields[0],
            DataObject::Structure(vec![
                DataObject::Unsigned16(8),
                DataObject::OctetString(vec![0, 0, 1, 0, 0, 255]),
                DataObject::Integer8(2),
                DataObject::Unsigned16(0),
            ])
        );
        assert_eq!(fields[1].as_date_time().unwrap(), from);
        assert_eq!(fields[3], DataObject::Array(vec![]));
        assert_eq!(AccessSelector::from_parameters(1, &parameters).unwrap(), selector);
    }

    #[test]
    fn test_unknown_selector_kept_opaque() {
        let parameters = DataObject::Unsigned8(7);
        let selector = AccessSelector::from_parameters(3, &parameters).unwrap();
        assert_eq!(
            selector,
            AccessSelector::Other {
                selector: 3,
                parameters
            }
        );
    }
}
