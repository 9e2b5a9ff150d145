use async_trait::async_trait;
use enricher_model::{StageDetails, StageName, Subject, WhoisDetails};
use serde_json::Value;

use super::check_status;
use crate::worker::{Artifact, Stage, StageError, StageLookup};

/// Registration data over RDAP: domain records for names, network records
/// for addresses.
#[derive(Debug, Clone)]
pub struct WhoisStage {
    client: reqwest::Client,
    base: String,
}

impl WhoisStage {
    pub fn new(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, subject: &Subject) -> String {
        match subject {
            Subject::Domain(domain) => format!("{}/domain/{domain}", self.base),
            Subject::IpAddress(ip) => format!("{}/ip/{ip}", self.base),
        }
    }
}

#[async_trait]
impl Stage for WhoisStage {
    fn name(&self) -> StageName {
        StageName::Whois
    }

    fn supports(&self, _subject: &Subject) -> bool {
        true
    }

    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<StageLookup, StageError> {
        let response = self
            .client
            .get(self.url(subject))
            .header(reqwest::header::ACCEPT, "application/rdap+json")
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let rdap: Value = serde_json::from_slice(&body)
            .map_err(|err| StageError::Other(format!("invalid RDAP body: {err}")))?;

        let details = match subject {
            Subject::Domain(_) => domain_details(&rdap),
            Subject::IpAddress(_) => network_details(&rdap),
        };
        Ok(StageLookup {
            details: StageDetails::Whois(details),
            artifacts: vec![Artifact::json(subject, body.to_vec())],
        })
    }
}

fn domain_details(rdap: &Value) -> WhoisDetails {
    WhoisDetails::Domain {
        registrar: entity_name(rdap, "registrar"),
        name: string_at(rdap, "ldhName").map(|n| n.to_ascii_lowercase()),
        org: entity_name(rdap, "registrant"),
        creation_date: event_date(rdap, "registration"),
        updated_date: event_date(rdap, "last changed"),
    }
}

fn network_details(rdap: &Value) -> WhoisDetails {
    let cidr = rdap
        .get("cidr0_cidrs")
        .and_then(Value::as_array)
        .and_then(|cidrs| cidrs.first())
        .and_then(|cidr| {
            let prefix = cidr
                .get("v4prefix")
                .or_else(|| cidr.get("v6prefix"))
                .and_then(Value::as_str)?;
            let length = cidr.get("length").and_then(Value::as_u64)?;
            Some(format!("{prefix}/{length}"))
        });
    let asn = rdap
        .get("arin_originas0_originautnums")
        .and_then(Value::as_array)
        .and_then(|asns| asns.first())
        .and_then(Value::as_u64)
        .map(|asn| asn.to_string());

    WhoisDetails::Network {
        asn_registry: string_at(rdap, "port43"),
        asn,
        asn_cidr: cidr,
        asn_country_code: string_at(rdap, "country"),
        asn_date: event_date(rdap, "registration"),
        asn_description: string_at(rdap, "name"),
    }
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn event_date(rdap: &Value, action: &str) -> Option<String> {
    rdap.get("events")?
        .as_array()?
        .iter()
        .find(|event| {
            event.get("eventAction").and_then(Value::as_str) == Some(action)
        })
        .and_then(|event| string_at(event, "eventDate"))
}

/// `fn` property of the first entity holding `role`.
fn entity_name(rdap: &Value, role: &str) -> Option<String> {
    let entity = rdap.get("entities")?.as_array()?.iter().find(|entity| {
        entity
            .get("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some(role)))
    })?;
    let properties = entity.get("vcardArray")?.as_array()?.get(1)?.as_array()?;
    properties.iter().find_map(|property| {
        let fields = property.as_array()?;
        if fields.first()?.as_str()? == "fn" {
            fields.get(3)?.as_str().map(str::to_string)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn domain_fields_come_from_entities_and_events() {
        let rdap = json!({
            "ldhName": "EXAMPLE.COM",
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "last changed", "eventDate": "2024-08-14T07:01:34Z"}
            ],
            "entities": [{
                "roles": ["registrar"],
                "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", "RESERVED-Internet Assigned Numbers Authority"]
                ]]
            }]
        });
        let WhoisDetails::Domain {
            registrar,
            name,
            org,
            creation_date,
            updated_date,
        } = domain_details(&rdap)
        else {
            panic!("expected domain details");
        };
        assert_eq!(
            registrar.as_deref(),
            Some("RESERVED-Internet Assigned Numbers Authority")
        );
        assert_eq!(name.as_deref(), Some("example.com"));
        assert_eq!(org, None);
        assert_eq!(creation_date.as_deref(), Some("1995-08-14T04:00:00Z"));
        assert_eq!(updated_date.as_deref(), Some("2024-08-14T07:01:34Z"));
    }

    #[test]
    fn network_fields_include_cidr_and_country() {
        let rdap = json!({
            "name": "PRIVATE-ADDRESS-ABLK-RFC1918-IANA-RESERVED",
            "country": "US",
            "port43": "whois.arin.net",
            "cidr0_cidrs": [{"v4prefix": "10.0.0.0", "length": 8}],
            "arin_originas0_originautnums": [64512]
        });
        let WhoisDetails::Network {
            asn_registry,
            asn,
            asn_cidr,
            asn_country_code,
            ..
        } = network_details(&rdap)
        else {
            panic!("expected network details");
        };
        assert_eq!(asn_registry.as_deref(), Some("whois.arin.net"));
        assert_eq!(asn.as_deref(), Some("64512"));
        assert_eq!(asn_cidr.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(asn_country_code.as_deref(), Some("US"));
    }
}
