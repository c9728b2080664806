pub mod oauth_core;

pub use oauth_core::authorization::{AuthorizationServer, AuthorizationServerBuilder};
pub use oauth_core::config::{AuthServerConfig, ResourceServerConfig, TokenSettings};
pub use oauth_core::endpoint::{EndpointResponse, TokenEndpoint};
pub use oauth_core::enhancer::{AdditionalInformationEnhancer, PrincipalAttributesEnhancer, ScopeCeilingEnhancer, TokenEnhancerChain};
pub use oauth_core::error::{ErrorCategory, OAuthError};
pub use oauth_core::http_client::{HttpClientError, HttpMethod, HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient};
#[cfg(feature = "remote")]
pub use oauth_core::http_client::ReqwestHttpClient;
pub use oauth_core::jwt::{JWTAlgorithm, JwtTokenCodec, KeyMaterial};
pub use oauth_core::memory::{InMemoryClientStore, InMemoryCodeStore, InMemoryRevocationList, InMemoryUserDirectory, UserRecord};
pub use oauth_core::oauth_provider::{AuthorizationCodeStore, ClientStore, EnhancementContext, RevocationList, TokenCodec, TokenEnhancer, UserDirectory};
pub use oauth_core::types::{AuthenticatedPrincipal, ClientDescriptor, GrantType, IssuedTokenPair, Principal, TokenClaims, TokenType};
pub use oauth_core::verifier::{AccessPolicy, AccessRule, AccessStatus, RemoteTokenServices, Requirement, ResourceVerifier, VerifiedAccess};
