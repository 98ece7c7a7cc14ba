#[macro_use]
mod common;

#[cfg(test)]
mod tests {
    use crate::common::connect;
    use bindery_core::{
        BindingError, BlobReader, Category, Error, Object, Opaque, Value, classify,
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Tag(String);

    impl Opaque for Tag {
        fn encode(&self) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
        fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
            Ok(Tag(String::from_utf8(bytes.to_vec())?))
        }
    }

    #[test]
    fn classification_is_stable() {
        for _ in 0..3 {
            assert_eq!(classify::<i32>(), Category::Integer);
            assert_eq!(classify::<Option<i32>>(), Category::Integer);
            assert_eq!(classify::<i64>(), Category::Long);
            assert_eq!(classify::<String>(), Category::String);
            assert_eq!(classify::<Vec<u8>>(), Category::Binary);
            assert_eq!(classify::<Box<[u8]>>(), Category::Binary);
            assert_eq!(classify::<BlobReader>(), Category::Blob);
            assert_eq!(classify::<Object<Tag>>(), Category::OpaqueObject);
            assert_eq!(classify::<()>(), Category::Null);
        }
        for category in Category::ALL {
            assert_eq!(Category::from_id(category.id()), Some(category));
        }
        assert_eq!(Category::from_id(99), None);
    }

    #[test]
    fn rebinding_same_type_keeps_the_slot() {
        let (mut connection, _) = connect();
        let statement = connection.statement("select a").unwrap();
        let first = statement.input::<i32>("a").unwrap();
        let second = statement.input::<Option<i32>>("a").unwrap();
        assert!(first.same_slot(&second));
        first.set(7).unwrap();
        assert_eq!(second.value(), Value::Integer(Some(7)));

        let out_first = statement.output::<i32>(1).unwrap();
        let out_second = statement.output::<i32>(1).unwrap();
        assert!(out_first.same_slot(&out_second));
        connection.close().unwrap();
    }

    #[test]
    fn rebinding_other_type_orphans_the_slot() {
        let (mut connection, _) = connect();
        let statement = connection.statement("select a").unwrap();
        let number = statement.input::<i32>("a").unwrap();
        let text = statement.input::<String>("a").unwrap();
        assert!(number.is_orphaned());
        assert!(!text.is_orphaned());
        assert!(!number.same_slot(&text));
        assert_eq!(text.category(), Category::String);

        let out = statement.output::<i32>(1).unwrap();
        let generic = statement.output::<Value>(1).unwrap();
        assert!(out.is_orphaned());
        assert!(!generic.is_orphaned());

        // Only the live slot reaches the link
        text.set("live").unwrap();
        number.set(1).unwrap();
        assert_eq!(statement.execute().unwrap(), 0);
        assert!(statement.fetch().unwrap());
        assert_eq!(generic.get().unwrap(), Some(Value::String(Some("live".into()))));
        connection.close().unwrap();
    }

    #[test]
    fn rejected_declarations() {
        let (mut connection, _) = connect();
        let statement = connection.statement("select a").unwrap();
        silent_logs! {
            let error = statement.input::<i32>("bad_name").unwrap_err();
            assert!(error.is_binding());
            assert!(matches!(
                statement.output::<i32>(0),
                Err(Error::Binding(BindingError::InvalidIndex(0)))
            ));
            assert!(matches!(
                statement.output::<i32>(2),
                Err(Error::Binding(BindingError::Rejected { .. }))
            ));
        }
        connection.close().unwrap();
    }

    #[test]
    fn values_round_trip_through_the_link() {
        let (mut connection, _) = connect();
        let statement = connection.statement("select bytes, tag, flag").unwrap();
        statement
            .input::<Vec<u8>>("bytes")
            .unwrap()
            .set(vec![0u8, 1, 2, 254, 255])
            .unwrap();
        statement
            .input::<Object<Tag>>("tag")
            .unwrap()
            .set(Object(Tag("opaque".into())))
            .unwrap();
        statement.input::<bool>("flag").unwrap().set(1).unwrap();
        let bytes = statement.output::<Vec<u8>>(1).unwrap();
        let tag = statement.output::<Object<Tag>>(2).unwrap();
        let flag = statement.output::<bool>(3).unwrap();
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        assert_eq!(bytes.get().unwrap(), Some(vec![0u8, 1, 2, 254, 255]));
        assert_eq!(tag.get().unwrap(), Some(Object(Tag("opaque".into()))));
        assert_eq!(flag.get().unwrap(), Some(true));
        assert!(!statement.fetch().unwrap());
        assert_eq!(bytes.get().unwrap(), None);
        connection.close().unwrap();
    }
}
