pub mod configuration;
pub mod contact;
pub mod login;
pub mod login_attempt;
pub mod openid;
pub mod security_policy;
pub mod token;

pub use configuration::{
    ConfigurationRecord, ConfigurationSummary, CustomConfiguration, ProviderConfiguration,
    ProviderType,
};
pub use contact::{Contact, LocalAccount, NewContact, PasswordRecord};
pub use login::{Credentials, LegacySession, LoginRequest};
pub use login_attempt::LockoutState;
pub use openid::{
    AccessGroup, AuthorizationRule, Claims, ClientAuthentication, ContactGroup, ContactTemplate,
    OpenIdConfigurationRecord, OpenIdCustomConfiguration,
};
pub use security_policy::{
    LocalConfigurationRecord, LocalCustomConfiguration, SecurityPolicy, SecurityPolicyRecord,
};
pub use token::{
    AuthenticationTokens, LoginResponse, NewProviderToken, ProviderToken, RefreshedTokens,
};
