use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    users (id) {
        id -> Uuid,
        name -> Text,
        email -> Text,
        role -> Text,
        organization -> Nullable<Text>,
        verified -> Bool,
        created_at -> Timestamptz,
    }
}

table! {
    donations (id) {
        id -> Uuid,
        donor_id -> Uuid,
        donor_name -> Text,
        food_name -> Text,
        quantity -> Text,
        description -> Nullable<Text>,
        expiry_time -> Timestamptz,
        image -> Nullable<Text>,
        address -> Nullable<Text>,
        latitude -> Double,
        longitude -> Double,
        status -> Text,
        accepted_by_id -> Nullable<Uuid>,
        accepted_by_name -> Nullable<Text>,
        pickup_time -> Nullable<Timestamptz>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    chats (id) {
        id -> Uuid,
        donation_id -> Uuid,
        status -> Text,
        last_activity -> Timestamptz,
        created_at -> Timestamptz,
    }
}

table! {
    chat_participants (chat_id, user_id) {
        chat_id -> Uuid,
        user_id -> Uuid,
        role -> Text,
        joined_at -> Timestamptz,
    }
}

table! {
    chat_messages (id) {
        id -> Uuid,
        seq -> BigInt,
        chat_id -> Uuid,
        sender_id -> Uuid,
        sender_name -> Text,
        sender_role -> Text,
        body -> Text,
        sent_at -> Timestamptz,
    }
}

table! {
    message_reads (message_id, user_id) {
        message_id -> Uuid,
        user_id -> Uuid,
        read_at -> Timestamptz,
    }
}

table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        title -> Text,
        body -> Text,
        kind -> Text,
        donation_id -> Nullable<Uuid>,
        read -> Bool,
        email_sent -> Bool,
        push_sent -> Bool,
        created_at -> Timestamptz,
    }
}

table! {
    device_tokens (id) {
        id -> Uuid,
        user_id -> Uuid,
        token -> Text,
        platform -> Text,
        active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

joinable!(chat_participants -> chats (chat_id));
joinable!(chat_messages -> chats (chat_id));
joinable!(message_reads -> chat_messages (message_id));

allow_tables_to_appear_in_same_query!(
    users,
    donations,
    chats,
    chat_participants,
    chat_messages,
    message_reads,
    notifications,
    device_tokens,
);
