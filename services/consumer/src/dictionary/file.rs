//! Dictionary file loading
//!
//! Reads the classic `RDMFieldDictionary` and `enumtype.def` text layouts.
//! Lines starting with `!` are comments.
//!
//! ```text
//! ACRONYM    DDE ACRONYM          FID  RIPPLES TO  FIELD TYPE     LENGTH  RWF TYPE   RWF LEN
//! BID        "BID"                 22  BID_1       PRICE              17  REAL64           7
//! RDN_EXCHID "IDN EXCHANGE ID"      4  NULL        ENUMERATED    3 ( 3 )  ENUM             1
//! ```
//!
//! An enum file lists one or more `ACRONYM FID` lines followed by the
//! `VALUE "DISPLAY"` rows shared by all of those fields. A display may also be
//! written as hex between `#` marks.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rdm_types::DataType;

use super::{DictionaryError, EnumDef, FieldDef};

pub fn load_field_file(path: &Path) -> Result<Vec<FieldDef>, DictionaryError> {
    let text = fs::read_to_string(path).map_err(|source| DictionaryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_field_dictionary(&text)
}

pub fn load_enum_file(path: &Path) -> Result<Vec<EnumDef>, DictionaryError> {
    let text = fs::read_to_string(path).map_err(|source| DictionaryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_enum_table(&text)
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('!')
}

fn parse_error(line: usize, reason: impl Into<String>) -> DictionaryError {
    DictionaryError::Parse {
        line,
        reason: reason.into(),
    }
}

pub fn parse_field_dictionary(text: &str) -> Result<Vec<FieldDef>, DictionaryError> {
    let mut defs = Vec::new();
    // ripple targets are names in the file; resolved once every fid is known
    let mut ripple_names: Vec<Option<String>> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if is_comment(line) {
            continue;
        }

        let open = line
            .find('"')
            .ok_or_else(|| parse_error(line_no, "missing quoted display name"))?;
        let close = line[open + 1..]
            .find('"')
            .map(|i| open + 1 + i)
            .ok_or_else(|| parse_error(line_no, "unterminated display name"))?;

        let name = line[..open].trim();
        if name.is_empty() {
            return Err(parse_error(line_no, "missing acronym"));
        }
        let display_name = &line[open + 1..close];
        let rest: Vec<&str> = line[close + 1..]
            .split_whitespace()
            .filter(|t| *t != "(" && *t != ")")
            .collect();
        if rest.len() < 6 {
            return Err(parse_error(line_no, "expected FID RIPPLES TYPE LENGTH RWFTYPE RWFLEN"));
        }

        let fid: i16 = rest[0]
            .parse()
            .map_err(|_| parse_error(line_no, format!("bad fid '{}'", rest[0])))?;
        let ripple = match rest[1] {
            "NULL" => None,
            other => Some(other.to_string()),
        };
        let rwf_type_name = rest[rest.len() - 2];
        let rwf_type = DataType::from_rwf_name(rwf_type_name)
            .ok_or_else(|| parse_error(line_no, format!("unknown RWF type '{}'", rwf_type_name)))?;
        let rwf_len: u16 = rest[rest.len() - 1]
            .parse()
            .map_err(|_| parse_error(line_no, format!("bad RWF length '{}'", rest[rest.len() - 1])))?;

        defs.push(FieldDef {
            name: name.to_string(),
            display_name: display_name.to_string(),
            fid,
            ripple_to: 0,
            rwf_type,
            rwf_len,
        });
        ripple_names.push(ripple);
    }

    let by_name: HashMap<&str, i16> = defs.iter().map(|d| (d.name.as_str(), d.fid)).collect();
    let ripples: Vec<i16> = ripple_names
        .iter()
        .map(|r| {
            r.as_deref()
                .and_then(|name| by_name.get(name).copied())
                .unwrap_or(0)
        })
        .collect();
    for (def, ripple) in defs.iter_mut().zip(ripples) {
        def.ripple_to = ripple;
    }
    Ok(defs)
}

fn parse_display(line_no: usize, raw: &str) -> Result<String, DictionaryError> {
    let raw = raw.trim_start();
    if let Some(body) = raw.strip_prefix('"') {
        let end = body
            .find('"')
            .ok_or_else(|| parse_error(line_no, "unterminated display"))?;
        Ok(body[..end].to_string())
    } else if let Some(body) = raw.strip_prefix('#') {
        let end = body
            .find('#')
            .ok_or_else(|| parse_error(line_no, "unterminated hex display"))?;
        let bytes = hex::decode(&body[..end])
            .map_err(|e| parse_error(line_no, format!("bad hex display: {}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Err(parse_error(line_no, "display must be quoted or #hex#"))
    }
}

pub fn parse_enum_table(text: &str) -> Result<Vec<EnumDef>, DictionaryError> {
    let mut defs = Vec::new();
    let mut group: Vec<i16> = Vec::new();
    let mut in_values = false;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if is_comment(line) {
            continue;
        }
        let trimmed = line.trim();
        let (first, rest) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(|| parse_error(line_no, "expected two columns"))?;

        if let Ok(value) = first.parse::<u16>() {
            if group.is_empty() {
                return Err(parse_error(line_no, "enum value before any field"));
            }
            in_values = true;
            let display = parse_display(line_no, rest)?;
            for fid in &group {
                defs.push(EnumDef {
                    fid: *fid,
                    value,
                    display: display.clone(),
                });
            }
        } else {
            if in_values {
                group.clear();
                in_values = false;
            }
            let fid_token = rest.split_whitespace().next().unwrap_or("");
            let fid: i16 = fid_token
                .parse()
                .map_err(|_| parse_error(line_no, format!("bad fid '{}' for {}", fid_token, first)))?;
            group.push(fid);
        }
    }
    Ok(defs)
}
