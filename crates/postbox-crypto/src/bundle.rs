//! Transport form of a pre-key bundle.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::ClientError;
use crate::identity::Identity;
use crate::signal::prekeys::{BundleKeyBytes, PreKeyBundle};
use crate::signal::{PreKeyRecord, SignedPreKeyRecord};

/// Public key material a peer needs to open a session, base64-encoded.
///
/// Every field is required; a bundle missing any of them does not
/// deserialize. `preKeyId`/`preKeyPublic` are accepted as input aliases for
/// peers using the older field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    #[serde(alias = "preKeyId")]
    pub one_time_pre_key_id: u32,
    #[serde(alias = "preKeyPublic")]
    pub one_time_pre_key_public: String,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: String,
    pub signed_pre_key_signature: String,
    pub identity_key_public: String,
}

impl KeyBundle {
    /// Snapshot the public halves of freshly generated key material.
    pub fn capture(
        identity: &Identity,
        registration_id: u32,
        device_id: u32,
        one_time_pre_key: &PreKeyRecord,
        signed_pre_key: &SignedPreKeyRecord,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            one_time_pre_key_id: one_time_pre_key.id,
            one_time_pre_key_public: codec::encode(&one_time_pre_key.key_pair.serialize_public()),
            signed_pre_key_id: signed_pre_key.id,
            signed_pre_key_public: codec::encode(&signed_pre_key.key_pair.serialize_public()),
            signed_pre_key_signature: codec::encode(&signed_pre_key.signature.to_bytes()),
            identity_key_public: codec::encode(&identity.public_key_bytes()),
        }
    }

    /// Decode every field and build the engine's bundle.
    ///
    /// Bad base64 yields `MalformedEncoding`; bytes the engine cannot parse
    /// as keys yield `InvalidKeyMaterial`.
    pub fn materialize(&self) -> Result<PreKeyBundle, ClientError> {
        let pre_key_public = codec::decode(&self.one_time_pre_key_public)?;
        let signed_pre_key_public = codec::decode(&self.signed_pre_key_public)?;
        let signed_pre_key_signature = codec::decode(&self.signed_pre_key_signature)?;
        let identity_key = codec::decode(&self.identity_key_public)?;

        PreKeyBundle::from_parts(
            self.registration_id,
            self.device_id,
            self.one_time_pre_key_id,
            self.signed_pre_key_id,
            &BundleKeyBytes {
                pre_key_public: &pre_key_public,
                signed_pre_key_public: &signed_pre_key_public,
                signed_pre_key_signature: &signed_pre_key_signature,
                identity_key: &identity_key,
            },
        )
        .map_err(|e| ClientError::InvalidKeyMaterial(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Identity, KeyBundle) {
        let identity = Identity::generate();
        let one_time = PreKeyRecord::generate(4);
        let signed = SignedPreKeyRecord::generate(9, &identity);
        let bundle = KeyBundle::capture(&identity, 1234, 1, &one_time, &signed);
        (identity, bundle)
    }

    #[test]
    fn capture_then_materialize_preserves_fields() {
        let (identity, bundle) = sample();
        let engine = bundle.materialize().unwrap();
        assert_eq!(engine.registration_id, 1234);
        assert_eq!(engine.device_id, 1);
        assert_eq!(engine.pre_key_id, 4);
        assert_eq!(engine.signed_pre_key_id, 9);
        assert_eq!(engine.identity_key, identity.public_key());
    }

    #[test]
    fn json_uses_camel_case_names() {
        let (_, bundle) = sample();
        let json = serde_json::to_value(&bundle).unwrap();
        for field in [
            "registrationId",
            "deviceId",
            "oneTimePreKeyId",
            "oneTimePreKeyPublic",
            "signedPreKeyId",
            "signedPreKeyPublic",
            "signedPreKeySignature",
            "identityKeyPublic",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn accepts_legacy_prekey_names() {
        let (_, bundle) = sample();
        let mut json = serde_json::to_value(&bundle).unwrap();
        let object = json.as_object_mut().unwrap();
        let id = object.remove("oneTimePreKeyId").unwrap();
        let public = object.remove("oneTimePreKeyPublic").unwrap();
        object.insert("preKeyId".into(), id);
        object.insert("preKeyPublic".into(), public);

        let parsed: KeyBundle = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn partial_bundle_does_not_deserialize() {
        let (_, bundle) = sample();
        let mut json = serde_json::to_value(&bundle).unwrap();
        json.as_object_mut().unwrap().remove("signedPreKeySignature");
        assert!(serde_json::from_value::<KeyBundle>(json).is_err());
    }

    #[test]
    fn bad_base64_is_malformed_encoding() {
        let (_, mut bundle) = sample();
        bundle.signed_pre_key_public = "%%%".into();
        assert!(matches!(
            bundle.materialize(),
            Err(ClientError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn wrong_key_length_is_invalid_key_material() {
        let (_, mut bundle) = sample();
        bundle.one_time_pre_key_public = codec::encode(&[5u8; 20]);
        assert!(matches!(
            bundle.materialize(),
            Err(ClientError::InvalidKeyMaterial(_))
        ));

        let (_, mut bundle) = sample();
        bundle.identity_key_public = String::new();
        assert!(matches!(
            bundle.materialize(),
            Err(ClientError::InvalidKeyMaterial(_))
        ));
    }
}
