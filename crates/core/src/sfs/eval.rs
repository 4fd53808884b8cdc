use std::collections::BTreeMap;

use serde_json::Value;

use super::parser::{Path, Step};
use crate::model::{DiffField, PathSegment};

/// Walk state for one branch of the pattern.
struct Cursor<'v> {
    spec: Option<&'v Value>,
    status: Option<&'v Value>,
    path: Vec<PathSegment>,
    keys: BTreeMap<String, Value>,
}

pub(crate) fn run(pattern: &Path, spec: &Value, status: &Value) -> Vec<DiffField> {
    let mut out = Vec::new();
    let cursor = Cursor {
        spec: Some(spec),
        status: Some(status),
        path: Vec::new(),
        keys: BTreeMap::new(),
    };
    walk(&pattern.steps, cursor, &mut out);
    out
}

fn walk(steps: &[Step], cur: Cursor<'_>, out: &mut Vec<DiffField>) {
    let Some((step, rest)) = steps.split_first() else {
        return;
    };
    match step {
        Step::Field(name) => {
            let spec = cur.spec.and_then(|v| v.get(name));
            let status = cur.status.and_then(|v| v.get(name));
            let mut path = cur.path;
            path.push(PathSegment::Field(name.clone()));
            let next = Cursor {
                spec,
                status,
                path,
                keys: cur.keys,
            };
            if rest.is_empty() {
                leaf(name, next, out);
            } else {
                walk(rest, next, out);
            }
        }
        Step::Keyed(key) => keyed(key, rest, cur, out),
        Step::Group(members) => {
            for member in members {
                let branch = Cursor {
                    spec: cur.spec,
                    status: cur.status,
                    path: cur.path.clone(),
                    keys: cur.keys.clone(),
                };
                walk(&member.steps, branch, out);
            }
        }
    }
}

fn keyed(key: &str, rest: &[Step], cur: Cursor<'_>, out: &mut Vec<DiffField>) {
    let Some(spec_items) = cur.spec.and_then(Value::as_array) else {
        return;
    };
    let status_items: &[Value] = cur
        .status
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    for (index, item) in spec_items.iter().enumerate() {
        let Some(id) = item.get(key) else {
            continue;
        };
        let partner = status_items.iter().find(|s| s.get(key) == Some(id));
        let mut path = cur.path.clone();
        path.push(PathSegment::Index(index));
        let mut keys = cur.keys.clone();
        keys.insert(key.to_owned(), id.clone());
        let next = Cursor {
            spec: Some(item),
            status: partner,
            path,
            keys,
        };
        if rest.is_empty() {
            leaf(key, next, out);
        } else {
            walk(rest, next, out);
        }
    }

    // Status elements whose key no longer appears in spec are pending removals.
    for orphan in status_items {
        let Some(id) = orphan.get(key) else {
            continue;
        };
        if spec_items.iter().any(|s| s.get(key) == Some(id)) {
            continue;
        }
        let mut keys = cur.keys.clone();
        keys.insert(key.to_owned(), id.clone());
        out.push(DiffField {
            keys,
            key: key.to_owned(),
            path: cur.path.clone(),
            spec: vec![Value::Null],
            status: vec![orphan.clone()],
        });
    }
}

fn leaf(key: &str, cur: Cursor<'_>, out: &mut Vec<DiffField>) {
    let Some(spec) = cur.spec else {
        return;
    };
    let status = cur.status.cloned().unwrap_or(Value::Null);
    if *spec == status {
        return;
    }
    out.push(DiffField {
        keys: cur.keys,
        key: key.to_owned(),
        path: cur.path,
        spec: vec![spec.clone()],
        status: vec![status],
    });
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn diff(pattern: &str, spec: Value, status: Value) -> Vec<DiffField> {
        run(&parse(pattern).unwrap(), &spec, &status)
    }

    #[test]
    fn scalar_field_differs() {
        let fields = diff("x", json!({"x": 20}), json!({"x": 10}));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].key, "x");
        assert_eq!(fields[0].path, vec![PathSegment::Field("x".into())]);
        assert_eq!(fields[0].spec, vec![json!(20)]);
        assert_eq!(fields[0].status, vec![json!(10)]);
    }

    #[test]
    fn missing_status_reads_as_null() {
        let fields = diff("host.cpu", json!({"host": {"cpu": 4}}), Value::Null);
        assert_eq!(fields[0].status, vec![Value::Null]);
        assert_eq!(
            fields[0].path,
            vec![
                PathSegment::Field("host".into()),
                PathSegment::Field("cpu".into())
            ]
        );
    }

    #[test]
    fn equal_or_absent_spec_yields_nothing() {
        assert!(diff("x", json!({"x": 1}), json!({"x": 1})).is_empty());
        assert!(diff("x", json!({}), json!({"x": 1})).is_empty());
    }

    #[test]
    fn keyed_arrays_pair_by_key() {
        let spec = json!({"disks": [{"id": "a", "size": 10}, {"id": "b", "size": 20}]});
        let status = json!({"disks": [{"id": "b", "size": 20}, {"id": "a", "size": 5}]});
        let fields = diff("disks.[id].size", spec, status);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].keys.get("id"), Some(&json!("a")));
        assert_eq!(
            fields[0].path,
            vec![
                PathSegment::Field("disks".into()),
                PathSegment::Index(0),
                PathSegment::Field("size".into())
            ]
        );
        assert_eq!(fields[0].status, vec![json!(5)]);
    }

    #[test]
    fn orphaned_status_element_is_a_removal() {
        let spec = json!({"disks": [{"id": "a", "size": 10}]});
        let status = json!({"disks": [{"id": "a", "size": 10}, {"id": "z", "size": 1}]});
        let fields = diff("disks.[id].size", spec, status);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].spec, vec![Value::Null]);
        assert_eq!(fields[0].path, vec![PathSegment::Field("disks".into())]);
        assert_eq!(fields[0].keys.get("id"), Some(&json!("z")));
    }

    #[test]
    fn group_members_contribute_independently() {
        let spec = json!({"vm": {"cpu": 2, "ram": 8, "name": "a"}});
        let status = json!({"vm": {"cpu": 1, "ram": 4, "name": "a"}});
        let fields = diff("vm.{cpu, ram, name}", spec, status);
        let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["cpu", "ram"]);
    }
}
