use crate::error::{AuthError, Result};
use base32::Alphabet;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::Luma;
use qrcode::QrCode;
use rand::Rng;
use subtle::ConstantTimeEq;
use totp_lite::{totp_custom, Sha1};

const TOTP_DIGITS: u32 = 6;
const TOTP_STEP: u64 = 30; // 30 seconds

/// Generate a random secret for TOTP
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let secret_bytes: Vec<u8> = (0..20).map(|_| rng.gen()).collect();
    base32::encode(Alphabet::Rfc4648 { padding: false }, &secret_bytes)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    base32::decode(Alphabet::Rfc4648 { padding: false }, secret)
        .ok_or_else(|| AuthError::Internal("stored TOTP secret is not valid base32".to_string()))
}

fn unix_time() -> Result<u64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| AuthError::Internal(format!("Time error: {}", e)))?
        .as_secs())
}

/// The code for `secret` at unix time `time`.
pub fn totp_at(secret: &str, time: u64) -> Result<String> {
    Ok(totp_custom::<Sha1>(TOTP_STEP, TOTP_DIGITS, &decode_secret(secret)?, time))
}

/// Generate the current TOTP code for a given secret
pub fn generate_totp(secret: &str) -> Result<String> {
    totp_at(secret, unix_time()?)
}

/// Verify a TOTP code against a secret, accepting one step of clock drift
/// either way.
pub fn verify_totp(secret: &str, code: &str) -> Result<bool> {
    let secret_bytes = decode_secret(secret)?;
    let time = unix_time()?;

    let mut matched = false;
    for time_offset in [-1i64, 0, 1] {
        let check_time = (time as i64 + (time_offset * TOTP_STEP as i64)) as u64;
        let expected_code = totp_custom::<Sha1>(TOTP_STEP, TOTP_DIGITS, &secret_bytes, check_time);
        matched |= bool::from(expected_code.as_bytes().ct_eq(code.as_bytes()));
    }

    Ok(matched)
}

/// otpauth:// URI for authenticator apps
pub fn generate_totp_uri(secret: &str, account_name: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account_name),
        secret,
        urlencoding::encode(issuer),
        TOTP_DIGITS,
        TOTP_STEP
    )
}

/// Render a TOTP URI as a PNG QR code, returned as a `data:` URL.
pub fn generate_qr_code(totp_uri: &str) -> Result<String> {
    let qr = QrCode::new(totp_uri.as_bytes())
        .map_err(|e| AuthError::Internal(format!("QR code generation failed: {}", e)))?;

    let image = qr.render::<Luma<u8>>().min_dimensions(256, 256).build();

    let mut png_bytes = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
        .map_err(|e| AuthError::Internal(format!("PNG encoding failed: {}", e)))?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32); // Base32 encoded 20 bytes
    }

    #[test]
    fn test_totp_verification() {
        let secret = generate_secret();
        let code = generate_totp(&secret).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(verify_totp(&secret, &code).unwrap());
    }

    #[test]
    fn rejects_codes_outside_the_drift_window() {
        let secret = generate_secret();
        let now = unix_time().unwrap();
        let stale = totp_at(&secret, now - 10 * TOTP_STEP).unwrap();
        let current = generate_totp(&secret).unwrap();
        // A stale code can collide with the current one by chance.
        if stale != current {
            assert!(!verify_totp(&secret, &stale).unwrap());
        }
        assert!(!verify_totp(&secret, "12345").unwrap());
    }

    #[test]
    fn test_totp_uri_generation() {
        let uri = generate_totp_uri("JBSWY3DPEHPK3PXP", "user@example.com", "AuthCore");
        assert!(uri.starts_with("otpauth://totp/AuthCore:user%40example.com"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=AuthCore"));
    }

    #[test]
    fn qr_code_is_a_png_data_url() {
        let qr = generate_qr_code("otpauth://totp/AuthCore:a?secret=JBSWY3DPEHPK3PXP").unwrap();
        assert!(qr.starts_with("data:image/png;base64,"));
    }
}
