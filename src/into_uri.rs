use http::Uri;
use http::uri::Scheme;

/// A trait to try to convert some type into a `Uri`.
///
/// This trait is "sealed", such that only types within arrow-fetch can
/// implement it.
pub trait IntoUri: IntoUriSealed {}

impl IntoUri for Uri {}
impl IntoUri for String {}
impl IntoUri for &str {}
impl IntoUri for &String {}

pub trait IntoUriSealed {
    // Besides parsing, the `Uri` must carry a host and an http(s) scheme
    // so that it can be dialed directly.
    fn into_uri(self) -> crate::Result<Uri>;
}

impl IntoUriSealed for Uri {
    fn into_uri(self) -> crate::Result<Uri> {
        match self.scheme() {
            Some(scheme) if *scheme == Scheme::HTTP || *scheme == Scheme::HTTPS => {}
            Some(scheme) => return Err(crate::Error::UnsupportedScheme(scheme.to_string())),
            None => return Err(crate::Error::UnsupportedScheme(String::new())),
        }
        if self.host().is_some() {
            Ok(self)
        } else {
            Err(crate::Error::HostRequired)
        }
    }
}

impl IntoUriSealed for &str {
    fn into_uri(self) -> crate::Result<Uri> {
        self.parse::<Uri>()?.into_uri()
    }
}

impl IntoUriSealed for &String {
    fn into_uri(self) -> crate::Result<Uri> {
        (&**self).into_uri()
    }
}

impl IntoUriSealed for String {
    fn into_uri(self) -> crate::Result<Uri> {
        (&*self).into_uri()
    }
}
