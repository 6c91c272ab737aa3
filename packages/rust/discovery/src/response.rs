//! Response schema of the people-search endpoint.

use leadflow_shared::RawCandidate;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub people: Vec<Person>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Person {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    estimated_num_employees: Option<u32>,
}

impl Person {
    pub(crate) fn into_candidate(self) -> RawCandidate {
        let name = match (self.first_name, self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first,
            _ => self.name.unwrap_or_default(),
        };
        let (company, company_size) = match self.organization {
            Some(org) => (org.name.unwrap_or_default(), org.estimated_num_employees),
            None => (String::new(), None),
        };

        RawCandidate {
            name: collapse_whitespace(&name),
            title: self.title.filter(|t| !t.trim().is_empty()),
            company: company.trim().to_string(),
            email: self.email.filter(|e| !e.trim().is_empty()),
            company_size,
            source: Some("people_search".into()),
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
