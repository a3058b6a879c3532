//! Common base URL inference.
//!
//! Resources that live in the same directory on the same host can share a
//! single [`Endpoint`][crate::client::Endpoint]. [`infer_base`] finds that
//! directory from the resource URLs themselves.

use crate::client::ClientError;

/// Compute the directory shared by every URL in `urls`.
///
/// The URLs are folded pairwise into their longest common prefix, which is
/// then cut back to the last `/` it contains. The result always ends in `/`;
/// a single URL yields its own directory.
///
/// Fails with [`ClientError::InvalidArgument`] when `urls` is empty, or when
/// the URLs share no directory at all.
///
/// ```
/// # use hyperpage::prefix::infer_base;
/// let base = infer_base(["http://h/a/b/x.jpg", "http://h/a/b/c/y.jpg"]).unwrap();
/// assert_eq!(base, "http://h/a/b/");
/// ```
pub fn infer_base<I, S>(urls: I) -> Result<String, ClientError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut urls = urls.into_iter();
    let first = urls
        .next()
        .ok_or_else(|| ClientError::InvalidArgument("no URLs to infer a base from".into()))?;

    let mut base = first.as_ref().to_owned();
    for url in urls {
        let len = common_prefix_len(&base, url.as_ref());
        base.truncate(len);
    }

    match base.rfind('/') {
        Some(idx) => base.truncate(idx + 1),
        None => {
            return Err(ClientError::InvalidArgument(format!(
                "URLs share no common directory: {base:?}"
            )))
        }
    }

    tracing::trace!(%base, "inferred base URL");
    Ok(base)
}

/// Length in bytes of the longest common prefix of `a` and `b`.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, left), right)| left != right)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_directory_of_many() {
        let urls = [
            "proto://h/a/b/sub/",
            "proto://h/a/b/sub/x.txt",
            "proto://h/a/b/subpath/y",
            "proto://h/a/b/second/z",
        ];
        assert_eq!(infer_base(urls).unwrap(), "proto://h/a/b/");
    }

    #[test]
    fn query_strings_do_not_leak_into_the_base() {
        let urls = [
            "protocol://www.domain.org/common/path/first/sub/",
            "protocol://www.domain.org/common/path/first/sub/resource.txt",
            "protocol://www.domain.org/common/path/firstpath/sub/request?param1=value1&param2=value2",
            "protocol://www.domain.org/common/path/second/path/request?param1=value1&param2=value2",
        ];
        assert_eq!(
            infer_base(urls).unwrap(),
            "protocol://www.domain.org/common/path/"
        );

        let urls = [
            "protocol://www.domain.org/common/path/first/sub/",
            "protocol://www.domain.org/common/path/first/sub/resource.txt",
            "protocol://www.domain.org/common/path/firstpath/sub/request?param1=value1&param2=value2",
            "protocol://www.domain.org/common/path/firstpath/request?param1=value1&param2=value2",
        ];
        assert_eq!(
            infer_base(urls).unwrap(),
            "protocol://www.domain.org/common/path/"
        );
    }

    #[test]
    fn single_url_yields_its_directory() {
        assert_eq!(infer_base(["proto://h/a/b/x.jpg"]).unwrap(), "proto://h/a/b/");
        assert_eq!(infer_base(["proto://h/a/b/"]).unwrap(), "proto://h/a/b/");
    }

    #[test]
    fn order_does_not_matter() {
        let forward = infer_base(["http://h/x/one.png", "http://h/x/y/two.png"]).unwrap();
        let backward = infer_base(["http://h/x/y/two.png", "http://h/x/one.png"]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, "http://h/x/");
    }

    #[test]
    fn multibyte_characters_split_cleanly() {
        let base = infer_base(["http://h/ä/é.png", "http://h/ä/ü.png"]).unwrap();
        assert_eq!(base, "http://h/ä/");
    }

    #[test]
    fn empty_input_is_rejected() {
        let urls: [&str; 0] = [];
        assert!(matches!(
            infer_base(urls),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unrelated_urls_are_rejected() {
        assert!(matches!(
            infer_base(["http:x", "ftp:y"]),
            Err(ClientError::InvalidArgument(_))
        ));
    }
}
