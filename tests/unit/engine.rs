//! Unit tests for the ownership-injecting renderer

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_yaml::Mapping;

use helm_operator::chart::{self, Chart, ChartMetadata};
use helm_operator::cluster::split_manifest_documents;
use helm_operator::release::{JinjaEngine, OwnerRefEngine, TemplateEngine};
use helm_operator::Error;

use crate::common::{chart_dir, MockEngine};

fn empty_chart() -> Chart {
    Chart {
        metadata: ChartMetadata {
            name: "test".to_string(),
            version: "0.1.0".to_string(),
            description: None,
        },
        templates: Vec::new(),
        default_values: Mapping::new(),
        requirements: Vec::new(),
        dependencies: Vec::new(),
    }
}

fn owner_refs() -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "Test".to_string(),
        name: "test".to_string(),
        uid: "123".to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

fn render(files: &[(&str, &str)]) -> helm_operator::Result<std::collections::BTreeMap<String, String>> {
    let engine = OwnerRefEngine::new(Arc::new(MockEngine::new(files)), owner_refs());
    engine.render(&empty_chart(), &Mapping::new())
}

fn non_empty_docs(text: &str) -> Vec<String> {
    split_manifest_documents(text)
        .into_iter()
        .filter(|d| !d.trim().is_empty())
        .collect()
}

const SINGLE_DOC: &str = concat!(
    "apiVersion: stable.nicolerenee.io/v1\n",
    "kind: Character\n",
    "metadata:\n",
    "  name: nemo\n",
    "spec:\n",
    "  name: Nemo\n",
);

mod owner_injection_tests {
    use super::*;

    #[test]
    fn test_owner_refs_added_to_every_yaml_file() {
        let out = render(&[("template.yaml", SINGLE_DOC), ("template2.yaml", SINGLE_DOC)]).unwrap();

        assert_eq!(out.len(), 2);
        for contents in out.values() {
            let docs = non_empty_docs(contents);
            assert_eq!(docs.len(), 1);
            let doc: serde_yaml::Value = serde_yaml::from_str(&docs[0]).unwrap();
            let refs = &doc["metadata"]["ownerReferences"];
            assert_eq!(refs[0]["name"], serde_yaml::Value::from("test"));
            assert_eq!(refs[0]["uid"], serde_yaml::Value::from("123"));
            assert_eq!(refs[0]["controller"], serde_yaml::Value::from(true));
            assert_eq!(refs[0]["blockOwnerDeletion"], serde_yaml::Value::from(true));
        }
    }

    #[test]
    fn test_output_ends_with_document_separator() {
        let out = render(&[("template.yaml", SINGLE_DOC)]).unwrap();
        assert!(out["template.yaml"].ends_with("---\n"));
    }

    #[test]
    fn test_empty_and_comment_files_are_omitted() {
        let out = render(&[
            ("template.yaml", SINGLE_DOC),
            ("empty.yaml", ""),
            ("comment.yaml", "# This is empty"),
        ])
        .unwrap();

        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["template.yaml"]);
    }

    #[test]
    fn test_non_yaml_files_are_dropped() {
        let out = render(&[("template.yaml", SINGLE_DOC), ("NOTES.txt", "some notes")]).unwrap();
        assert!(!out.contains_key("NOTES.txt"));
    }

    #[test]
    fn test_multi_document_file_preserves_count_and_order() {
        let multi = concat!(
            "kind: ConfigMap\n",
            "apiVersion: v1\n",
            "metadata:\n",
            "  name: eighth\n",
            "data:\n",
            "  name: value\n",
            "---\n",
            "apiVersion: v1\n",
            "kind: Pod\n",
            "metadata:\n",
            "  name: example-test\n",
        );
        let out = render(&[("template.yaml", multi)]).unwrap();

        let docs = non_empty_docs(&out["template.yaml"]);
        assert_eq!(docs.len(), 2);
        let first: serde_yaml::Value = serde_yaml::from_str(&docs[0]).unwrap();
        let second: serde_yaml::Value = serde_yaml::from_str(&docs[1]).unwrap();
        assert_eq!(first["kind"], serde_yaml::Value::from("ConfigMap"));
        assert_eq!(second["kind"], serde_yaml::Value::from("Pod"));
        for doc in [&first, &second] {
            assert!(doc["metadata"]["ownerReferences"].as_sequence().is_some());
        }
    }

    #[test]
    fn test_empty_documents_within_a_file_are_elided() {
        let contents = format!("---\n# disabled by a conditional\n---\n{}", SINGLE_DOC);
        let out = render(&[("template.yaml", contents.as_str())]).unwrap();
        assert_eq!(non_empty_docs(&out["template.yaml"]).len(), 1);
    }

    #[test]
    fn test_unparseable_document_fails_naming_the_file() {
        let err = render(&[("bad.yaml", "{ this is: not yaml")]).unwrap_err();
        match err {
            Error::RenderParse { file, .. } => assert_eq!(file, "bad.yaml"),
            other => panic!("expected RenderParse, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_document_is_a_parse_error() {
        let err = render(&[("scalar.yaml", "just a string\n")]).unwrap_err();
        assert!(matches!(err, Error::RenderParse { .. }));
    }
}

mod jinja_engine_tests {
    use super::*;

    #[test]
    fn test_renders_values_into_templates() {
        let dir = chart_dir();
        let chart = chart::load_dir(dir.path()).unwrap();

        let mut overrides = Mapping::new();
        overrides.insert("replicas".into(), 3.into());
        let values = chart::coalesce_values(&chart, &overrides);

        let out = JinjaEngine::new().render(&chart, &values).unwrap();
        assert!(out["templates/deployment.yaml"].contains("replicas: 3"));
        // Default survives where no override was given.
        assert!(out["templates/service.yaml"].contains("port: 8080"));
        // The raw render still carries non-yaml files; filtering is the
        // owner-ref wrapper's job.
        assert!(out.contains_key("templates/NOTES.txt"));
    }
}
