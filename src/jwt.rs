use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{ServiceAccountKey, Signer};
use crate::AuthError;

/// Permissions requested for a JWT.
/// See https://developers.google.com/identity/protocols/oauth2/service-account#authorizingrequests.
#[derive(Serialize, Debug)]
pub(crate) struct Claims<'a> {
    iss: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
    scope: &'a str,
    #[serde(skip)]
    kid: Option<&'a str>,
}

impl<'a> Claims<'a> {
    /// Claims issued at `now`, valid for `lifetime_secs`
    ///
    /// `now` is the token endpoint's clock as far as we know it, which may differ from ours.
    pub(crate) fn new(
        key: &'a ServiceAccountKey,
        scope: &'a str,
        sub: Option<&'a str>,
        now: DateTime<Utc>,
        lifetime_secs: i64,
    ) -> Self {
        let iat = now.timestamp();
        Claims {
            iss: &key.client_email,
            aud: &key.token_uri,
            exp: iat + lifetime_secs,
            iat,
            sub,
            scope,
            kid: key.private_key_id.as_deref(),
        }
    }

    pub(crate) fn to_jwt(&self, signer: &Signer) -> Result<String, AuthError> {
        let header = Header {
            alg: "RS256",
            typ: "JWT",
            kid: self.kid,
        };

        let mut jwt = String::new();
        URL_SAFE_NO_PAD.encode_string(encode_json(&header)?, &mut jwt);
        jwt.push('.');
        URL_SAFE_NO_PAD.encode_string(encode_json(self)?, &mut jwt);

        let signature = signer.sign(jwt.as_bytes())?;
        jwt.push('.');
        URL_SAFE_NO_PAD.encode_string(&signature, &mut jwt);
        Ok(jwt)
    }
}

#[derive(Serialize)]
struct Header<'a> {
    alg: &'a str,
    typ: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

fn encode_json(value: &impl Serialize) -> Result<Vec<u8>, AuthError> {
    serde_json::to_vec(value).map_err(|err| AuthError::credentials("failed to encode JWT", err))
}

pub(crate) const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
