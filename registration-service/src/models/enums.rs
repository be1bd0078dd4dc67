//! Closed vocabularies stored as text columns.

use rust_decimal::Decimal;
use thiserror::Error;

/// A string that does not name any variant of a closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum whose wire form and column form are the same literal.
///
/// Generates `as_str`, `ALL`, `Display`, `FromStr`, serde renames and the
/// sqlx `Type`/`Encode`/`Decode` impls that read and write the literal
/// through a `VARCHAR` column.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant, )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }

            pub const NAMES: &'static [&'static str] = &[$($text),+];
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                Ok(text.parse::<$name>()?)
            }
        }
    };
}

pub(crate) use text_enum;

text_enum! {
    pub enum Gender {
        Male => "MALE",
        Female => "FEMALE",
        PreferNotToSay => "PREFER_NOT_TO_SAY",
    }
}

text_enum! {
    /// Where the applicant heard about the programme.
    pub enum DiscoverSource {
        RiseInstagram => "RISE_INSTAGRAM",
        OtherInstagram => "OTHER_INSTAGRAM",
        FriendsColleagues => "FRIENDS_COLLEAGUES",
        Other => "OTHER",
    }
}

text_enum! {
    pub enum ScholarshipType {
        FullyFunded => "FULLY_FUNDED",
        SelfFunded => "SELF_FUNDED",
    }
}

impl ScholarshipType {
    /// Registration fee in USD.
    pub fn usd_amount(self) -> Decimal {
        match self {
            ScholarshipType::FullyFunded => Decimal::from(15),
            ScholarshipType::SelfFunded => Decimal::from(750),
        }
    }

    /// Line item shown on the hosted checkout page.
    pub fn item_name(self) -> &'static str {
        match self {
            ScholarshipType::FullyFunded => "RYLS Fully Funded Registration Fee",
            ScholarshipType::SelfFunded => "RYLS Self Funded Registration Fee",
        }
    }

    pub fn item_id(self) -> &'static str {
        match self {
            ScholarshipType::FullyFunded => "RYLS-FULLY-FUNDED",
            ScholarshipType::SelfFunded => "RYLS-SELF-FUNDED",
        }
    }
}

text_enum! {
    pub enum EssayTopic {
        GreenClimate => "Green Climate",
        GreenCurriculum => "Green Curriculum",
        GreenInnovation => "Green Innovation",
        GreenAction => "Green Action",
        GreenTransition => "Green Transition",
    }
}

text_enum! {
    pub enum PaymentMethod {
        /// Hosted checkout, settled through signed notifications.
        Midtrans => "MIDTRANS",
        /// Manual transfer proven by an uploaded file, reviewed by an admin.
        Paypal => "PAYPAL",
    }
}

text_enum! {
    pub enum FileKind {
        Essay => "ESSAY",
        Headshot => "HEADSHOT",
        PaymentProof => "PAYMENT_PROOF",
    }
}

impl FileKind {
    /// Whether a (sniffed) MIME type is acceptable for this kind.
    pub fn accepts(self, mime: &str) -> bool {
        let is_pdf = mime == "application/pdf";
        let is_image = mime.starts_with("image/");
        match self {
            FileKind::Essay => is_pdf,
            FileKind::Headshot => is_image,
            FileKind::PaymentProof => is_pdf || is_image,
        }
    }

    pub fn policy_description(self) -> &'static str {
        match self {
            FileKind::Essay => "a PDF document",
            FileKind::Headshot => "an image",
            FileKind::PaymentProof => "an image or a PDF document",
        }
    }
}
