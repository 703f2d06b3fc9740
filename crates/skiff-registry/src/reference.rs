use crate::config::DEFAULT_TAG;
use crate::RegistryError;
use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// An official-library image and the tag or digest to pull.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub name: String,
    /// A tag (`latest`, `3.19`) or a content digest (`sha256:...`).
    pub reference: String,
}

impl ImageReference {
    /// Parse `name`, `name:tag`, `name@digest` or `library/name[:tag]`,
    /// using `default_tag` when neither tag nor digest is given.
    pub fn parse(input: &str, default_tag: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidReference {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty image name"));
        }

        let (path, reference) = if let Some((path, digest)) = trimmed.split_once('@') {
            validate_digest(digest).map_err(|r| invalid(&r))?;
            // `name:tag@digest` pins by digest; the tag is informational.
            let path = match path.rsplit_once(':') {
                Some((name, tag)) if !tag.contains('/') => {
                    validate_tag(tag).map_err(|r| invalid(&r))?;
                    name
                }
                _ => path,
            };
            (path, digest.to_owned())
        } else {
            match trimmed.rsplit_once(':') {
                Some((path, tag)) if !tag.contains('/') => {
                    validate_tag(tag).map_err(|r| invalid(&r))?;
                    (path, tag.to_owned())
                }
                _ => (trimmed, default_tag.to_owned()),
            }
        };

        let name = path.strip_prefix("library/").unwrap_or(path);
        if name.contains('/') {
            return Err(invalid(
                "only official library images (e.g. 'alpine', 'library/alpine') are supported",
            ));
        }
        validate_name(name).map_err(|r| invalid(&r))?;

        Ok(Self {
            name: name.to_owned(),
            reference,
        })
    }

    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    /// The repository path used in registry URLs and token scopes.
    pub fn repository(&self) -> String {
        format!("library/{}", self.name)
    }
}

impl FromStr for ImageReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_TAG)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest() {
            write!(f, "{}@{}", self.name, self.reference)
        } else {
            write!(f, "{}:{}", self.name, self.reference)
        }
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty image name".to_owned());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name longer than {MAX_NAME_LEN} bytes"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'))
    {
        return Err("name may only contain lowercase letters, digits, '.', '_' and '-'".to_owned());
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err("name must start and end with a letter or digit".to_owned());
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() {
        return Err("empty tag".to_owned());
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(format!("tag longer than {MAX_TAG_LEN} bytes"));
    }
    if tag.starts_with(['.', '-']) {
        return Err("tag must not start with '.' or '-'".to_owned());
    }
    if !tag
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        return Err(format!("invalid character in tag '{tag}'"));
    }
    Ok(())
}

fn validate_digest(digest: &str) -> Result<(), String> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(format!("digest '{digest}' is missing an algorithm prefix"));
    };
    if algorithm.is_empty()
        || !algorithm
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'+' || b == b'.')
    {
        return Err(format!("invalid digest algorithm '{algorithm}'"));
    }
    if hex.len() < 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("invalid digest hex '{hex}'"));
    }
    Ok(())
}
