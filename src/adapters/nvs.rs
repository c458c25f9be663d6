//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] on top of ESP-IDF NVS blobs.  On the host it
//! keeps blobs in a map so persistence round-trips can be tested.
//!
//! Keys and namespaces are limited to 15 bytes by NVS; longer names are
//! rejected rather than truncated so two records can never alias.

use crate::app::ports::{ConfigError, StorageError, StoragePort};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// NVS limit for namespace and key names, excluding the terminator.
const NVS_NAME_MAX: usize = 15;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<(String, String), Vec<u8>>,
}

/// NUL-terminated copy of an NVS name.
fn c_name(name: &str) -> Result<[u8; NVS_NAME_MAX + 1], StorageError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > NVS_NAME_MAX || bytes.contains(&0) {
        return Err(StorageError::IoError);
    }
    let mut buf = [0u8; NVS_NAME_MAX + 1];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

impl NvsAdapter {
    /// Initialise NVS flash.
    ///
    /// A partition with no free pages or from a newer IDF is erased and
    /// re-initialised.  Any other failure is `ConfigError::IoError`.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS use.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK || unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
            Ok(Self {})
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NvsAdapter: in-memory backend");
            Ok(Self {
                store: HashMap::new(),
            })
        }
    }

    /// Open `namespace`, run `f` with the handle, close it again.
    #[cfg(target_os = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let ns = c_name(namespace)?;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        match ret {
            ESP_OK => {}
            // A read-only open of a namespace never written fails this way.
            ESP_ERR_NVS_NOT_FOUND => return Err(StorageError::NotFound),
            _ => return Err(StorageError::IoError),
        }
        let result = f(handle);
        // SAFETY: `handle` came from a successful nvs_open.
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn commit(handle: nvs_handle_t) -> Result<(), StorageError> {
        // SAFETY: `handle` is open for writing.
        match unsafe { nvs_commit(handle) } {
            ESP_OK => Ok(()),
            _ => Err(StorageError::IoError),
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            c_name(namespace)?;
            c_name(key)?;
            let data = self
                .store
                .get(&(namespace.to_owned(), key.to_owned()))
                .ok_or(StorageError::NotFound)?;
            let dst = buf.get_mut(..data.len()).ok_or(StorageError::Corrupted)?;
            dst.copy_from_slice(data);
            Ok(data.len())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key)?;
            Self::with_handle(namespace, false, |handle| {
                let mut size = buf.len();
                // SAFETY: `buf` is valid for `size` bytes and `key` is NUL-terminated.
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                match ret {
                    ESP_OK => Ok(size),
                    ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                    ESP_ERR_NVS_INVALID_LENGTH => Err(StorageError::Corrupted),
                    _ => Err(StorageError::IoError),
                }
            })
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            c_name(namespace)?;
            c_name(key)?;
            self.store
                .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key)?;
            Self::with_handle(namespace, true, |handle| {
                // SAFETY: `data` is valid for its length and `key` is NUL-terminated.
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                match ret {
                    ESP_OK => Self::commit(handle),
                    ESP_ERR_NVS_NOT_ENOUGH_SPACE => Err(StorageError::Full),
                    _ => {
                        warn!("NvsAdapter: write error {}", ret);
                        Err(StorageError::IoError)
                    }
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store.remove(&(namespace.to_owned(), key.to_owned()));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key)?;
            let result = Self::with_handle(namespace, true, |handle| {
                // SAFETY: `key` is NUL-terminated.
                match unsafe { nvs_erase_key(handle, key.as_ptr().cast()) } {
                    ESP_OK | ESP_ERR_NVS_NOT_FOUND => Self::commit(handle),
                    _ => Err(StorageError::IoError),
                }
            });
            match result {
                Err(StorageError::NotFound) => Ok(()),
                other => other,
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .contains_key(&(namespace.to_owned(), key.to_owned()))
        }

        #[cfg(target_os = "espidf")]
        {
            let Ok(key) = c_name(key) else {
                return false;
            };
            Self::with_handle(namespace, false, |handle| {
                // SAFETY: `key` is NUL-terminated; the type out-param may be null.
                let ret = unsafe {
                    nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut())
                };
                Ok(ret == ESP_OK)
            })
            .unwrap_or(false)
        }
    }
}
