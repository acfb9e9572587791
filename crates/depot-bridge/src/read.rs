//! Read path: stream the head revision of one depot file

use crate::backend::{ByteStream, DepotConnection, FileStatus};
use crate::error::BridgeError;
use crate::locator::RepositoryPath;

/// Stream the head content of `path`
///
/// # Errors
/// - `NotFound` if the file never existed or is deleted at head
/// - `Backend` if the server rejects the query or the content request
/// - `ConnectionError` on transport failure; nothing is retried
pub async fn read(connection: &dyn DepotConnection, path: &RepositoryPath) -> Result<ByteStream, BridgeError> {
    let server = connection.server();
    tracing::info!(%server, %path, "reading depot file");

    let listing = connection.depot_files(path).await.map_err(|e| {
        tracing::error!(%server, %path, error = %e, "depot file query failed");
        BridgeError::from_backend(server, e)
    })?;

    match FileStatus::classify(&listing) {
        (FileStatus::PresentLive, _) => {}
        (_, Some(message)) => {
            tracing::error!(%server, %path, message, "depot reported an error");
            return Err(BridgeError::Backend(message.to_string()));
        }
        (status, None) => {
            tracing::debug!(%server, %path, ?status, "no live head revision");
            return Err(BridgeError::NotFound {
                path: path.to_string(),
            });
        }
    }

    connection.contents(path).await.map_err(|e| {
        tracing::error!(%server, %path, error = %e, "content request failed");
        BridgeError::from_backend(server, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileAction, FileSpec, MockDepotConnection};
    use crate::error::BackendError;
    use crate::server::ServerIdentity;
    use tokio::io::AsyncReadExt;

    fn path() -> RepositoryPath {
        RepositoryPath::new("//depot/sample.txt").unwrap()
    }

    fn mock_with_listing(listing: Vec<FileSpec>) -> MockDepotConnection {
        let mut mock = MockDepotConnection::new();
        mock.expect_server().return_const(ServerIdentity::new(false, "depot", 1666));
        mock.expect_depot_files().returning(move |_| Ok(listing.clone()));
        mock
    }

    #[tokio::test]
    async fn live_file_is_streamed() {
        let mut mock = mock_with_listing(vec![FileSpec::valid("//depot/sample.txt", 2, FileAction::Edit)]);
        mock.expect_contents()
            .times(1)
            .returning(|_| Ok(Box::pin(std::io::Cursor::new(b"hello".to_vec())) as ByteStream));

        let mut stream = read(&mock, &path()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn deleted_file_is_not_found() {
        let mut mock = mock_with_listing(vec![FileSpec::valid("//depot/sample.txt", 3, FileAction::Delete)]);
        mock.expect_contents().never();

        let err = read(&mock, &path()).await.err().unwrap();
        assert!(matches!(err, BridgeError::NotFound { ref path } if path == "//depot/sample.txt"));
    }

    #[tokio::test]
    async fn absent_file_is_not_found() {
        let mock = mock_with_listing(vec![FileSpec::info("//depot/sample.txt - no such file(s).")]);
        let err = read(&mock, &path()).await.err().unwrap();
        assert!(matches!(err, BridgeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn error_status_is_backend_error() {
        let mock = mock_with_listing(vec![FileSpec::error("protections table denies read")]);
        let err = read(&mock, &path()).await.err().unwrap();
        assert!(matches!(err, BridgeError::Backend(ref m) if m == "protections table denies read"));
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let mut mock = MockDepotConnection::new();
        mock.expect_server().return_const(ServerIdentity::new(false, "depot", 1666));
        mock.expect_depot_files()
            .times(1)
            .returning(|_| Err(BackendError::Connection("reset by peer".into())));

        let err = read(&mock, &path()).await.err().unwrap();
        assert!(matches!(err, BridgeError::ConnectionError { .. }));
    }
}
