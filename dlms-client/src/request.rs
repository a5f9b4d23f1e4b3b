//! What callers submit and what they get back

use crate::error::{DlmsError, DlmsResult};
use dlms_application::selector::AccessSelector;
use dlms_application::service::{AttributeReference, CosemAttributeDescriptor};
use dlms_core::{DataAccessResult, DataObject, ObisCode};
use std::time::Duration;

/// One attribute to read, or to write when it carries a value
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectReference {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub attribute_id: i8,
    pub selector: Option<AccessSelector>,
    pub write_value: Option<DataObject>,
}

impl ObjectReference {
    pub fn new(class_id: u16, instance_id: ObisCode, attribute_id: i8) -> Self {
        Self {
            class_id,
            instance_id,
            attribute_id,
            selector: None,
            write_value: None,
        }
    }

    /// Read with selective access, e.g. a slice of a profile buffer
    pub fn with_selector(mut self, selector: AccessSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Turn the read into a write of `value`
    pub fn with_value(mut self, value: DataObject) -> Self {
        self.write_value = Some(value);
        self
    }

    pub fn is_write(&self) -> bool {
        self.write_value.is_some()
    }

    pub fn descriptor(&self) -> CosemAttributeDescriptor {
        CosemAttributeDescriptor::new(self.class_id, self.instance_id, self.attribute_id)
    }

    pub(crate) fn attribute_reference(&self) -> AttributeReference {
        AttributeReference {
            descriptor: self.descriptor(),
            access_selection: self.selector.clone(),
        }
    }
}

/// A delivered value
///
/// Writes deliver [`DataObject::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct ItemValue {
    pub value: DataObject,
    /// From submission to the response that carried this item
    pub delivered_in: Duration,
}

/// Results of one submission, in submission order
#[derive(Debug)]
pub struct BatchResult {
    results: Vec<DlmsResult<ItemValue>>,
    delivered_in: Duration,
}

impl BatchResult {
    pub(crate) fn new(results: Vec<DlmsResult<ItemValue>>, delivered_in: Duration) -> Self {
        Self {
            results,
            delivered_in,
        }
    }

    /// From submission to delivery of the whole batch
    pub fn delivered_in(&self) -> Duration {
        self.delivered_in
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[DlmsResult<ItemValue>] {
        &self.results
    }

    pub fn into_results(self) -> Vec<DlmsResult<ItemValue>> {
        self.results
    }

    /// Value of item `index`, `None` if the item failed
    pub fn data_at(&self, index: usize) -> Option<&DataObject> {
        match self.results.get(index) {
            Some(Ok(item)) => Some(&item.value),
            _ => None,
        }
    }

    /// Data-access-result of item `index`
    ///
    /// `Success` for delivered items, the device's code for rejected ones,
    /// `None` for items that failed otherwise (e.g. timed out).
    pub fn data_access_result_at(&self, index: usize) -> Option<DataAccessResult> {
        match self.results.get(index)? {
            Ok(_) => Some(DataAccessResult::Success),
            Err(DlmsError::DataAccess(result)) => Some(*result),
            Err(_) => None,
        }
    }

    /// The error of item `index`, if it failed
    pub fn error_at(&self, index: usize) -> Option<&DlmsError> {
        self.results.get(index)?.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_accessors() {
        let item = ItemValue {
            value: DataObject::Unsigned16(230),
            delivered_in: Duration::from_millis(12),
        };
        let batch = BatchResult::new(
            vec![
                Ok(item),
                Err(DlmsError::DataAccess(DataAccessResult::ObjectUnavailable)),
                Err(DlmsError::RequestTimeout),
            ],
            Duration::from_millis(40),
        );
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.data_at(0), Some(&DataObject::Unsigned16(230)));
        assert_eq!(batch.data_access_result_at(0), Some(DataAccessResult::Success));
        assert_eq!(batch.data_at(1), None);
        assert_eq!(
            batch.data_access_result_at(1),
            Some(DataAccessResult::ObjectUnavailable)
        );
        assert_eq!(batch.data_access_result_at(2), None);
        assert!(matches!(batch.error_at(2), Some(DlmsError::RequestTimeout)));
        assert_eq!(batch.data_access_result_at(3), None);
        assert_eq!(batch.delivered_in(), Duration::from_millis(40));
    }

    #[test]
    fn test_write_reference() {
        let reference = ObjectReference::new(1, ObisCode::new(0, 0, 96, 1, 0, 255), 2)
            .with_value(DataObject::Unsigned8(1));
        assert!(reference.is_write());
        assert_eq!(reference.attribute_reference().access_selection, None);
    }
}
