//! COS request signing (HMAC-SHA1, `q-sign-algorithm=sha1`)

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Everything except the RFC 3986 unreserved characters
const COS_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Signs requests with a secret id/key pair.
#[derive(Clone)]
pub struct Signer {
    secret_id: String,
    secret_key: String,
}

/// Request parts covered by the signature
pub struct SignRequest<'a> {
    pub method: &'a str,
    /// Unencoded object path, starting with `/`
    pub path: &'a str,
    pub params: &'a [(String, String)],
    pub headers: &'a [(String, String)],
    /// Validity window as unix seconds
    pub start: i64,
    pub end: i64,
}

impl Signer {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self, request: &SignRequest<'_>) -> Result<String, InvalidLength> {
        let key_time = format!("{};{}", request.start, request.end);
        let sign_key = hex::encode(hmac_sha1(self.secret_key.as_bytes(), key_time.as_bytes())?);

        let (param_list, params) = canonical_pairs(request.params);
        let (header_list, headers) = canonical_pairs(request.headers);

        let http_string = format!(
            "{}\n{}\n{}\n{}\n",
            request.method.to_lowercase(),
            request.path,
            params,
            headers
        );
        let string_to_sign = format!(
            "sha1\n{}\n{}\n",
            key_time,
            hex::encode(Sha1::digest(http_string.as_bytes()))
        );
        let signature = hex::encode(hmac_sha1(sign_key.as_bytes(), string_to_sign.as_bytes())?);

        Ok(format!(
            "q-sign-algorithm=sha1&q-ak={}&q-sign-time={kt}&q-key-time={kt}\
             &q-header-list={}&q-url-param-list={}&q-signature={}",
            self.secret_id,
            header_list,
            param_list,
            signature,
            kt = key_time,
        ))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("secret_id", &self.secret_id)
            .finish_non_exhaustive()
    }
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, COS_ENCODE_SET).to_string()
}

/// Request query string, encoded exactly as the signature covers it.
///
/// Keys keep their case and order; an empty value still gets its `=`.
pub fn query_string(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the `;`-joined key list and the `&`-joined `key=value` string,
/// with keys lowercased, both sides encoded and sorted by key.
fn canonical_pairs(pairs: &[(String, String)]) -> (String, String) {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (encode(&k.to_lowercase()), encode(v)))
        .collect();
    encoded.sort();

    let keys = encoded
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    (keys, joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_pairs_sorted_and_encoded() {
        let (keys, joined) = canonical_pairs(&pairs(&[("uploadId", "abc 1"), ("partNumber", "2")]));
        assert_eq!(keys, "partnumber;uploadid");
        assert_eq!(joined, "partnumber=2&uploadid=abc%201");
    }

    #[test]
    fn test_authorization_known_signature() {
        let signer = Signer::new("AKIDEXAMPLE", "secret-key");
        let params = pairs(&[("uploadId", "abc 1"), ("partNumber", "2")]);
        let headers = pairs(&[("Host", "bucket-1250000000.cos.ap-guangzhou.myqcloud.com")]);

        let auth = signer.authorization(&SignRequest {
            method: "PUT",
            path: "/backups/daily.tar",
            params: &params,
            headers: &headers,
            start: 1_700_000_000,
            end: 1_700_003_600,
        })
        .unwrap();

        assert_eq!(
            auth,
            "q-sign-algorithm=sha1&q-ak=AKIDEXAMPLE\
             &q-sign-time=1700000000;1700003600&q-key-time=1700000000;1700003600\
             &q-header-list=host&q-url-param-list=partnumber;uploadid\
             &q-signature=02e88ac2f3456471cef4323f92916de4015e8258"
        );
    }

    #[test]
    fn test_query_string_matches_signed_encoding() {
        let params = pairs(&[("prefix", "my backups/2024+x"), ("max-keys", "1000"), ("uploads", "")]);
        let query = query_string(&params);
        assert_eq!(query, "prefix=my%20backups%2F2024%2Bx&max-keys=1000&uploads=");

        // Every value on the wire is byte-identical to the signed one
        let (_, signed) = canonical_pairs(&params);
        for pair in query.split('&') {
            assert!(signed.split('&').any(|p| p == pair), "{} not signed as sent", pair);
        }
    }

    #[test]
    fn test_debug_hides_secret_key() {
        let signer = Signer::new("AKIDEXAMPLE", "secret-key");
        let debug = format!("{:?}", signer);
        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("secret-key"));
    }
}
