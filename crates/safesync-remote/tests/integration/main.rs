//! Integration tests for safesync-remote
//!
//! wiremock stands in for the Dropbox API and an ownCloud WebDAV server;
//! the stores are driven through the `IRemoteStore` port.

mod common;

mod test_dropbox;
mod test_owncloud;
