use std::{ptr, slice};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use promptly_core::crypto::{CryptoError, EncryptionProvider};
use windows_sys::Win32::{
    Foundation::LocalFree,
    Security::Cryptography::{
        CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
    },
};

use crate::provider::PLATFORM_NATIVE_MARKER;

/// Extra secret mixed into every DPAPI call so other callers of the same
/// user-scoped facility cannot unprotect our values.
const ENTROPY: &[u8] = b"promptly-cli/dpapi-entropy/v1";

/// Windows DPAPI, bound to the current user account.
pub struct DpapiEncryption;

impl DpapiEncryption {
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Self)
    }
}

impl EncryptionProvider for DpapiEncryption {
    fn name(&self) -> &'static str {
        "dpapi"
    }

    fn marker(&self) -> &'static str {
        PLATFORM_NATIVE_MARKER
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let protected = protect(plaintext.as_bytes()).map_err(|reason| CryptoError::Encrypt {
            reason,
        })?;
        Ok(format!("{PLATFORM_NATIVE_MARKER}{}", STANDARD.encode(protected)))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let Some(encoded) = ciphertext.strip_prefix(PLATFORM_NATIVE_MARKER) else {
            return Ok(ciphertext.to_string());
        };
        let payload = STANDARD.decode(encoded).map_err(|e| CryptoError::Malformed {
            reason: format!("base64 decode failed: {e}"),
        })?;
        let plaintext = unprotect(&payload).map_err(|reason| CryptoError::Decrypt { reason })?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt {
            reason: format!("plaintext is not utf-8: {e}"),
        })
    }
}

fn blob(data: &[u8]) -> CRYPT_INTEGER_BLOB {
    CRYPT_INTEGER_BLOB {
        cbData: data.len() as u32,
        pbData: data.as_ptr() as *mut u8,
    }
}

fn protect(data: &[u8]) -> Result<Vec<u8>, String> {
    let input = blob(data);
    let entropy = blob(ENTROPY);
    let mut output = CRYPT_INTEGER_BLOB {
        cbData: 0,
        pbData: ptr::null_mut(),
    };

    // SAFETY: input and entropy point at live slices for the duration of the
    // call; output is allocated by the OS and released with LocalFree below.
    let ok = unsafe {
        CryptProtectData(
            &input,
            ptr::null(),
            &entropy,
            ptr::null(),
            ptr::null(),
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut output,
        )
    };
    if ok == 0 {
        return Err(format!(
            "CryptProtectData failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(take_blob(output))
}

fn unprotect(data: &[u8]) -> Result<Vec<u8>, String> {
    let input = blob(data);
    let entropy = blob(ENTROPY);
    let mut output = CRYPT_INTEGER_BLOB {
        cbData: 0,
        pbData: ptr::null_mut(),
    };

    // SAFETY: see `protect`.
    let ok = unsafe {
        CryptUnprotectData(
            &input,
            ptr::null_mut(),
            &entropy,
            ptr::null(),
            ptr::null(),
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut output,
        )
    };
    if ok == 0 {
        return Err(format!(
            "CryptUnprotectData failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(take_blob(output))
}

/// Copy an OS-allocated blob into a Vec and free the original.
fn take_blob(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
    if blob.pbData.is_null() {
        return Vec::new();
    }
    // SAFETY: pbData/cbData describe a buffer allocated by DPAPI.
    let bytes = unsafe { slice::from_raw_parts(blob.pbData, blob.cbData as usize) }.to_vec();
    unsafe {
        LocalFree(blob.pbData as _);
    }
    bytes
}
