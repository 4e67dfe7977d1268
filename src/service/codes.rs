//! Static table of service error codes.
//!
//! Codes are the `Code` element of an error body. Each known code carries
//! the status the service documents for it; codes the table does not know
//! parse to [`ErrorCode::Unknown`].

use std::fmt;

use http::StatusCode;

macro_rules! error_codes {
    ($($variant:ident => $wire:literal, $status:literal;)+) => {
        /// A service error code.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum ErrorCode {
            $(
                #[doc = concat!("`", $wire, "`")]
                $variant,
            )+
            /// A code missing from the table.
            Unknown(String),
        }

        impl ErrorCode {
            /// Looks up `code`.
            #[must_use]
            pub fn parse(code: &str) -> Self {
                match code {
                    $($wire => Self::$variant,)+
                    other => Self::Unknown(other.to_string()),
                }
            }

            /// The code as it appears on the wire.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown(code) => code,
                }
            }

            /// Status the service documents for this code; `400` when unknown.
            #[must_use]
            pub fn http_status(&self) -> StatusCode {
                let status: u16 = match self {
                    $(Self::$variant => $status,)+
                    Self::Unknown(_) => 400,
                };
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    };
}

error_codes! {
    AccessDenied => "AccessDenied", 403;
    AccessFailure => "AccessFailure", 403;
    AccountProblem => "AccountProblem", 403;
    AmbiguousGrantByEmailAddress => "AmbiguousGrantByEmailAddress", 400;
    AttributeDoesNotExist => "AttributeDoesNotExist", 404;
    AuthFailure => "AuthFailure", 401;
    AuthMissingFailure => "AuthMissingFailure", 403;
    BadDigest => "BadDigest", 400;
    BucketAlreadyExists => "BucketAlreadyExists", 409;
    BucketAlreadyOwnedByYou => "BucketAlreadyOwnedByYou", 409;
    BucketNotEmpty => "BucketNotEmpty", 409;
    ConditionalCheckFailed => "ConditionalCheckFailed", 409;
    ConflictingQueryParameter => "ConflictingQueryParameter", 400;
    CredentialsNotSupported => "CredentialsNotSupported", 400;
    CrossLocationLoggingProhibited => "CrossLocationLoggingProhibited", 403;
    EntityTooLarge => "EntityTooLarge", 400;
    EntityTooSmall => "EntityTooSmall", 400;
    ExistsAndExpectedValue => "ExistsAndExpectedValue", 400;
    ExpiredToken => "ExpiredToken", 400;
    FeatureDeprecated => "FeatureDeprecated", 400;
    IncompleteBody => "IncompleteBody", 400;
    IncompleteExpectedExpression => "IncompleteExpectedExpression", 400;
    IncorrectNumberOfFilesInPostRequest => "IncorrectNumberOfFilesInPostRequest", 400;
    InlineDataTooLarge => "InlineDataTooLarge", 400;
    InternalError => "InternalError", 500;
    InvalidAccessKeyId => "InvalidAccessKeyId", 403;
    InvalidAction => "InvalidAction", 400;
    InvalidAddress => "InvalidAddress", 404;
    InvalidAddressingHeader => "InvalidAddressingHeader", 400;
    InvalidArgument => "InvalidArgument", 400;
    InvalidBucketName => "InvalidBucketName", 400;
    InvalidBucketState => "InvalidBucketState", 409;
    InvalidDigest => "InvalidDigest", 400;
    InvalidHttpAuthHeader => "InvalidHTTPAuthHeader", 400;
    InvalidHttpRequest => "InvalidHttpRequest", 400;
    InvalidLiteral => "InvalidLiteral", 400;
    InvalidLocationConstraint => "InvalidLocationConstraint", 400;
    InvalidNextToken => "InvalidNextToken", 400;
    InvalidNumberPredicates => "InvalidNumberPredicates", 400;
    InvalidNumberValueTests => "InvalidNumberValueTests", 400;
    InvalidObjectState => "InvalidObjectState", 403;
    InvalidParameterCombination => "InvalidParameterCombination", 400;
    InvalidParameterValue => "InvalidParameterValue", 400;
    InvalidPart => "InvalidPart", 400;
    InvalidPartOrder => "InvalidPartOrder", 400;
    InvalidPayer => "InvalidPayer", 403;
    InvalidPolicyDocument => "InvalidPolicyDocument", 400;
    InvalidQueryExpression => "InvalidQueryExpression", 400;
    InvalidQueryParameter => "InvalidQueryParameter", 400;
    InvalidRange => "InvalidRange", 416;
    InvalidRequest => "InvalidRequest", 400;
    InvalidResponseGroups => "InvalidResponseGroups", 400;
    InvalidSecurity => "InvalidSecurity", 403;
    InvalidSecurityToken => "InvalidSecurityToken", 400;
    InvalidService => "InvalidService", 400;
    InvalidSoapRequest => "InvalidSOAPRequest", 400;
    InvalidSortExpression => "InvalidSortExpression", 400;
    InvalidStorageClass => "InvalidStorageClass", 400;
    InvalidTargetBucketForLogging => "InvalidTargetBucketForLogging", 400;
    InvalidToken => "InvalidToken", 400;
    InvalidUri => "InvalidURI", 400;
    InvalidWsAddressingProperty => "InvalidWSAddressingProperty", 400;
    InvalidWsdlVersion => "InvalidWSDLVersion", 400;
    KeyTooLong => "KeyTooLong", 400;
    MalformedAclError => "MalformedACLError", 400;
    MalformedPostRequest => "MalformedPOSTRequest", 400;
    MalformedVersion => "MalformedVersion", 400;
    MalformedXml => "MalformedXML", 400;
    MaxMessageLengthExceeded => "MaxMessageLengthExceeded", 400;
    MaxPostPreDataLengthExceededError => "MaxPostPreDataLengthExceededError", 400;
    MetadataTooLarge => "MetadataTooLarge", 400;
    MethodNotAllowed => "MethodNotAllowed", 405;
    MissingAction => "MissingAction", 400;
    MissingAttachment => "MissingAttachment", 400;
    MissingClientTokenId => "MissingClientTokenId", 403;
    MissingContentLength => "MissingContentLength", 411;
    MissingCredentials => "MissingCredentials", 401;
    MissingParameter => "MissingParameter", 400;
    MissingRequestBodyError => "MissingRequestBodyError", 400;
    MissingSecurityElement => "MissingSecurityElement", 400;
    MissingSecurityHeader => "MissingSecurityHeader", 400;
    MissingWsAddressingProperty => "MissingWSAddressingProperty", 400;
    MultiValuedAttribute => "MultiValuedAttribute", 409;
    MultipleExistsConditions => "MultipleExistsConditions", 400;
    MultipleExpectedNames => "MultipleExpectedNames", 400;
    MultipleExpectedValues => "MultipleExpectedValues", 400;
    NoLoggingStatusForKey => "NoLoggingStatusForKey", 400;
    NoSuchBucket => "NoSuchBucket", 404;
    NoSuchBucketPolicy => "NoSuchBucketPolicy", 404;
    NoSuchDomain => "NoSuchDomain", 400;
    NoSuchKey => "NoSuchKey", 404;
    NoSuchLifecycleConfiguration => "NoSuchLifecycleConfiguration", 404;
    NoSuchUpload => "NoSuchUpload", 404;
    NoSuchVersion => "NoSuchVersion", 404;
    NotAuthorizedToUseVersion => "NotAuthorizedToUseVersion", 401;
    NotImplemented => "NotImplemented", 501;
    NotSignedUp => "NotSignedUp", 403;
    NotYetImplemented => "NotYetImplemented", 401;
    NumberDomainAttributesExceeded => "NumberDomainAttributesExceeded", 409;
    NumberDomainBytesExceeded => "NumberDomainBytesExceeded", 409;
    NumberDomainsExceeded => "NumberDomainsExceeded", 409;
    NumberItemAttributesExceeded => "NumberItemAttributesExceeded", 409;
    NumberSubmittedAttributesExceeded => "NumberSubmittedAttributesExceeded", 409;
    NumberSubmittedItemsExceeded => "NumberSubmittedItemsExceeded", 409;
    OperationAborted => "OperationAborted", 409;
    PermanentRedirect => "PermanentRedirect", 301;
    PreconditionFailed => "PreconditionFailed", 412;
    QueryTimeout => "QueryTimeout", 408;
    QueueInternalError => "AWS.SimpleQueueService.InternalError", 500;
    QueueNonExistentQueue => "AWS.SimpleQueueService.NonExistentQueue", 400;
    Redirect => "Redirect", 307;
    RequestExpired => "RequestExpired", 400;
    RequestIsNotMultiPartContent => "RequestIsNotMultiPartContent", 400;
    RequestThrottled => "RequestThrottled", 403;
    RequestTimeTooSkewed => "RequestTimeTooSkewed", 403;
    RequestTimeout => "RequestTimeout", 400;
    RequestTorrentOfBucketError => "RequestTorrentOfBucketError", 400;
    RestoreAlreadyInProgress => "RestoreAlreadyInProgress", 409;
    ServiceUnavailable => "ServiceUnavailable", 503;
    SignatureDoesNotMatch => "SignatureDoesNotMatch", 403;
    SlowDown => "SlowDown", 503;
    TemporaryRedirect => "TemporaryRedirect", 307;
    TokenRefreshRequired => "TokenRefreshRequired", 400;
    TooManyBuckets => "TooManyBuckets", 400;
    TooManyRequestedAttributes => "TooManyRequestedAttributes", 400;
    UnexpectedContent => "UnexpectedContent", 400;
    UnresolvableGrantByEmailAddress => "UnresolvableGrantByEmailAddress", 400;
    UnsupportedHttpVerb => "UnsupportedHttpVerb", 400;
    UnsupportedNextToken => "UnsupportedNextToken", 400;
    UriTooLong => "URITooLong", 400;
    UserKeyMustBeSpecified => "UserKeyMustBeSpecified", 400;
    X509ParseError => "X509ParseError", 400;
}

impl ErrorCode {
    /// Whether resending the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InternalError
                | Self::QueueInternalError
                | Self::ServiceUnavailable
                | Self::SlowDown
                | Self::RequestTimeout
                | Self::RequestThrottled
                | Self::OperationAborted
        )
    }

    /// Whether the code asks the client to resend elsewhere.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            Self::PermanentRedirect | Self::TemporaryRedirect | Self::Redirect
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_codes() {
        assert_eq!(ErrorCode::parse("NoSuchKey"), ErrorCode::NoSuchKey);
        assert_eq!(ErrorCode::NoSuchKey.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::parse("AWS.SimpleQueueService.NonExistentQueue"),
            ErrorCode::QueueNonExistentQueue
        );
        assert_eq!(ErrorCode::parse("InvalidRange").http_status().as_u16(), 416);
    }

    #[test]
    fn test_unknown_code_round_trips_text() {
        let code = ErrorCode::parse("SomethingNew");
        assert_eq!(code, ErrorCode::Unknown("SomethingNew".to_string()));
        assert_eq!(code.as_str(), "SomethingNew");
        assert_eq!(code.http_status(), StatusCode::BAD_REQUEST);
        assert!(!code.is_transient());
    }

    #[test]
    fn test_transient_codes() {
        assert!(ErrorCode::SlowDown.is_transient());
        assert!(ErrorCode::InternalError.is_transient());
        assert!(ErrorCode::QueueInternalError.is_transient());
        assert!(!ErrorCode::AccessDenied.is_transient());
        assert!(!ErrorCode::NoSuchUpload.is_transient());
    }

    #[test]
    fn test_redirect_codes() {
        assert!(ErrorCode::parse("TemporaryRedirect").is_redirect());
        assert_eq!(ErrorCode::PermanentRedirect.http_status().as_u16(), 301);
        assert!(!ErrorCode::NoSuchBucket.is_redirect());
    }
}
