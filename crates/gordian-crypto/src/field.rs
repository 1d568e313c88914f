//! Encrypted fields: a typed value kept alongside its cipher-set ciphertext

use gordian_core::{GordianError, GordianResult};

use crate::cipherset::CipherSet;

/// Values that can live in an [`EncryptedField`].
pub trait FieldValue: Clone + PartialEq {
    fn to_field_bytes(&self) -> Vec<u8>;
    fn from_field_bytes(bytes: &[u8]) -> GordianResult<Self>;
}

impl FieldValue for String {
    fn to_field_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_field_bytes(bytes: &[u8]) -> GordianResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| GordianError::data(format!("field is not UTF-8: {e}")))
    }
}

impl FieldValue for Vec<u8> {
    fn to_field_bytes(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_field_bytes(bytes: &[u8]) -> GordianResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl FieldValue for bool {
    fn to_field_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn from_field_bytes(bytes: &[u8]) -> GordianResult<Self> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(GordianError::data("boolean field must be a single 0 or 1 byte")),
        }
    }
}

macro_rules! be_field_value {
    ($($ty:ty),*) => {$(
        impl FieldValue for $ty {
            fn to_field_bytes(&self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }

            fn from_field_bytes(bytes: &[u8]) -> GordianResult<Self> {
                let raw = bytes.try_into().map_err(|_| {
                    GordianError::data(format!(
                        "{} field must be {} bytes, got {}",
                        stringify!($ty),
                        std::mem::size_of::<$ty>(),
                        bytes.len()
                    ))
                })?;
                Ok(<$ty>::from_be_bytes(raw))
            }
        }
    )*};
}

be_field_value!(i32, i64, f64);

/// A value plus its encrypted form. The ciphertext is only recomputed when the value changes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedField<T: FieldValue> {
    value: T,
    encrypted: Vec<u8>,
}

impl<T: FieldValue> EncryptedField<T> {
    pub fn new(cipher: &CipherSet, value: T) -> GordianResult<Self> {
        let encrypted = cipher.encrypt_bytes(&value.to_field_bytes())?;
        Ok(Self { value, encrypted })
    }

    /// Decrypt a stored ciphertext once.
    pub fn from_encrypted(cipher: &CipherSet, encrypted: Vec<u8>) -> GordianResult<Self> {
        let value = T::from_field_bytes(&cipher.decrypt_bytes(&encrypted)?)?;
        Ok(Self { value, encrypted })
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn encrypted(&self) -> &[u8] {
        &self.encrypted
    }

    /// Replace the value. Returns `false` and keeps the ciphertext when nothing changed.
    pub fn set(&mut self, cipher: &CipherSet, value: T) -> GordianResult<bool> {
        if value == self.value {
            return Ok(false);
        }
        self.encrypted = cipher.encrypt_bytes(&value.to_field_bytes())?;
        self.value = value;
        Ok(true)
    }

    /// Take `other`'s ciphertext when it holds the same value.
    pub fn adopt(&mut self, other: &EncryptedField<T>) -> bool {
        if other.value != self.value {
            return false;
        }
        self.encrypted.clone_from(&other.encrypted);
        true
    }
}
