//! `$jsonSchema` validator builder for [`CollectionSpec`](crate::CollectionSpec).
//!
//! ```rust,ignore
//! let schema = SchemaBuilder::new()
//!     .required(["email", "role"])
//!     .field("email", Property::string().min_length(3).max_length(254))
//!     .field("role", Property::string().one_of(["admin", "member"]))
//!     .field("tags", Property::array(Property::string()));
//! ensure_collection(db, "users", &CollectionSpec::new().json_schema(schema)).await?;
//! ```

use bson::{doc, Bson, Document};

/// Top-level schema. Starts as `bsonType: "object"`.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaBuilder {
    schema: Document,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: doc! { "bsonType": "object" },
        }
    }

    pub fn bson_type(mut self, bson_type: &str) -> Self {
        self.schema.insert("bsonType", bson_type);
        self
    }

    /// Replace the required field list. An empty list leaves it unchanged.
    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = string_array(fields);
        if !fields.is_empty() {
            self.schema.insert("required", fields);
        }
        self
    }

    /// Add or replace the schema for one property. Blank names are ignored.
    pub fn field(mut self, name: &str, property: impl Into<Document>) -> Self {
        if name.is_empty() {
            return self;
        }
        if !self.schema.contains_key("properties") {
            self.schema.insert("properties", Document::new());
        }
        if let Ok(properties) = self.schema.get_document_mut("properties") {
            properties.insert(name, property.into());
        }
        self
    }

    /// The schema without the `$jsonSchema` wrapper.
    pub fn schema(&self) -> &Document {
        &self.schema
    }

    /// Validator document: `{ "$jsonSchema": { ... } }`.
    pub fn build(self) -> Document {
        doc! { "$jsonSchema": self.schema }
    }
}

impl From<SchemaBuilder> for Document {
    fn from(builder: SchemaBuilder) -> Self {
        builder.build()
    }
}

/// Schema for a single property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Property(Document);

impl Property {
    /// No constraints yet.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(bson_type: &str) -> Self {
        Self(doc! { "bsonType": bson_type })
    }

    pub fn string() -> Self {
        Self::of_type("string")
    }

    pub fn int() -> Self {
        Self::of_type("int")
    }

    pub fn long() -> Self {
        Self::of_type("long")
    }

    pub fn boolean() -> Self {
        Self::of_type("bool")
    }

    pub fn date() -> Self {
        Self::of_type("date")
    }

    pub fn array(items: Property) -> Self {
        Self(doc! { "bsonType": "array", "items": items.0 })
    }

    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Property)>,
        K: Into<String>,
    {
        let properties: Document = properties
            .into_iter()
            .map(|(name, property)| (name.into(), Bson::Document(property.0)))
            .collect();
        Self(doc! { "bsonType": "object", "properties": properties })
    }

    /// Required fields of a nested object.
    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = string_array(fields);
        if !fields.is_empty() {
            self.0.insert("required", fields);
        }
        self
    }

    /// Restrict the value to one of `values`.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.insert("enum", string_array(values));
        self
    }

    pub fn min_length(mut self, n: u32) -> Self {
        self.0.insert("minLength", i64::from(n));
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.0.insert("maxLength", i64::from(n));
        self
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

impl From<Property> for Document {
    fn from(property: Property) -> Self {
        property.0
    }
}

fn string_array<I, S>(values: I) -> Vec<Bson>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(|v| Bson::String(v.into())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_schema_is_object() {
        assert_eq!(
            SchemaBuilder::new().build(),
            doc! { "$jsonSchema": { "bsonType": "object" } }
        );
    }

    #[test]
    fn test_fields_and_required() {
        let validator = SchemaBuilder::new()
            .required(["email", "role"])
            .field("email", Property::string().min_length(3).max_length(254))
            .field("role", Property::string().one_of(["admin", "member"]))
            .field("age", Property::int())
            .build();

        assert_eq!(
            validator,
            doc! {
                "$jsonSchema": {
                    "bsonType": "object",
                    "required": ["email", "role"],
                    "properties": {
                        "email": { "bsonType": "string", "minLength": 3_i64, "maxLength": 254_i64 },
                        "role": { "bsonType": "string", "enum": ["admin", "member"] },
                        "age": { "bsonType": "int" },
                    },
                },
            }
        );
    }

    #[test]
    fn test_empty_required_and_blank_field_ignored() {
        let schema = SchemaBuilder::new()
            .required(Vec::<String>::new())
            .field("", Property::string());
        assert_eq!(schema.schema(), &doc! { "bsonType": "object" });
    }

    #[test]
    fn test_field_replaces_existing_property() {
        let schema = SchemaBuilder::new()
            .field("count", Property::int())
            .field("count", Property::long());
        assert_eq!(
            schema.schema().get_document("properties").unwrap(),
            &doc! { "count": { "bsonType": "long" } }
        );
    }

    #[test]
    fn test_nested_array_and_object() {
        let address = Property::object([
            ("city", Property::string()),
            ("verified_at", Property::date()),
        ])
        .required(["city"]);
        let schema = SchemaBuilder::new()
            .field("tags", Property::array(Property::string()))
            .field("address", address)
            .field("active", Property::boolean());

        let properties = schema.schema().get_document("properties").unwrap();
        assert_eq!(
            properties.get_document("tags").unwrap(),
            &doc! { "bsonType": "array", "items": { "bsonType": "string" } }
        );
        assert_eq!(
            properties.get_document("address").unwrap(),
            &doc! {
                "bsonType": "object",
                "properties": {
                    "city": { "bsonType": "string" },
                    "verified_at": { "bsonType": "date" },
                },
                "required": ["city"],
            }
        );
        assert_eq!(
            properties.get_document("active").unwrap(),
            &doc! { "bsonType": "bool" }
        );
    }

    #[test]
    fn test_enum_without_type() {
        assert_eq!(
            Property::new().one_of(["a", "b"]).into_document(),
            doc! { "enum": ["a", "b"] }
        );
    }

    #[test]
    fn test_bson_type_override() {
        let schema = SchemaBuilder::new().bson_type("array");
        assert_eq!(schema.schema().get_str("bsonType").unwrap(), "array");
    }
}
