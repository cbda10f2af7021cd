use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The domain a role belongs to
#[braid(serde)]
pub struct DomainName;

/// A role within a domain
#[braid(serde)]
pub struct RoleName;

/// A role token as issued by the token service
#[braid(serde, debug = "owned", display = "owned")]
pub struct RoleToken;

limited_reveal!(RoleTokenRef: "ROLE TOKEN", 20);

/// A principal token identifying the caller to the token service
#[braid(serde, debug = "owned", display = "owned")]
pub struct PrincipalToken;

limited_reveal!(PrincipalTokenRef: "PRINCIPAL TOKEN", 12);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tokens_are_hidden_by_default() {
        let token = RoleToken::from_static("v=Z1;d=sports;r=reader;s=signature");

        assert_eq!(format!("{}", token), "***ROLE TOKEN***");
        assert_eq!(format!("{:?}", token), "***ROLE TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = RoleToken::from_static("v=Z1;d=sports;r=reader;s=signature");

        assert_eq!(format!("{:#?}", token), "\"v=Z1;d=sports;r=rea…\"");
        assert_eq!(format!("{:#6?}", token), "\"v=Z1;…\"");
    }

    #[test]
    fn short_principal_tokens_are_revealed_whole_on_request() {
        let token = PrincipalToken::from_static("v=U1");

        assert_eq!(format!("{:#}", token), "v=U1");
        assert_eq!(format!("{}", token), "***PRINCIPAL TOKEN***");
    }
}
