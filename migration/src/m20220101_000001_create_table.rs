use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("CREATE EXTENSION IF NOT EXISTS postgis;")
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MmNode::Table)
                    .if_not_exists()
                    .col(big_serial_pk(MmNode::Id))
                    .col(big_integer(MmNode::OsmId).unique_key())
                    .col(
                        ColumnDef::new(MmNode::Coord)
                            .custom(Alias::new("GEOMETRY(POINT, 4326)"))
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MmWay::Table)
                    .if_not_exists()
                    .col(big_serial_pk(MmWay::Id))
                    .col(big_integer(MmWay::OsmId).unique_key())
                    .col(string_len_null(MmWay::Name, 1024))
                    .col(string_len_null(MmWay::Highway, 128))
                    .col(boolean(MmWay::Oneway).default(false))
                    .col(
                        ColumnDef::new(MmWay::Path)
                            .custom(Alias::new("GEOMETRY(LINESTRING, 4326)"))
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MmWayNode::Table)
                    .if_not_exists()
                    .col(big_serial_pk(MmWayNode::Id))
                    .col(big_integer(MmWayNode::WayId))
                    .col(big_integer(MmWayNode::NodeId))
                    .col(integer(MmWayNode::Index))
                    .col(integer(MmWayNode::Size))
                    .foreign_key(
                        ForeignKey::create()
                            .from(MmWayNode::Table, MmWayNode::WayId)
                            .to(MmWay::Table, MmWay::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MmWayNode::Table, MmWayNode::NodeId)
                            .to(MmNode::Table, MmNode::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MmSegment::Table)
                    .if_not_exists()
                    .col(big_serial_pk(MmSegment::Id))
                    .col(big_integer(MmSegment::WayId))
                    .col(big_integer(MmSegment::OsmId))
                    .col(integer(MmSegment::Index))
                    .col(integer(MmSegment::Size))
                    .col(string_len_null(MmSegment::Name, 1024))
                    .col(string_len_null(MmSegment::Highway, 128))
                    .col(boolean(MmSegment::Oneway).default(false))
                    .col(
                        ColumnDef::new(MmSegment::Geometry)
                            .custom(Alias::new("GEOMETRY(LINESTRING, 4326)"))
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MmSegment::Table, MmSegment::WayId)
                            .to(MmWay::Table, MmWay::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MmSegmentNode::Table)
                    .if_not_exists()
                    .col(big_serial_pk(MmSegmentNode::Id))
                    .col(big_integer(MmSegmentNode::SegmentId))
                    .col(big_integer(MmSegmentNode::NodeId))
                    .col(integer(MmSegmentNode::Index))
                    .col(integer(MmSegmentNode::Size))
                    .foreign_key(
                        ForeignKey::create()
                            .from(MmSegmentNode::Table, MmSegmentNode::SegmentId)
                            .to(MmSegment::Table, MmSegment::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MmSegmentNode::Table, MmSegmentNode::NodeId)
                            .to(MmNode::Table, MmNode::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Nearest-segment lookups order by distance to a point.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS mm_segment_geometry_gix ON mm_segment USING GIST (geometry);",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("mm_segment_osm_id_idx")
                    .table(MmSegment::Table)
                    .col(MmSegment::OsmId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MmSegmentNode::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MmSegment::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MmWayNode::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MmWay::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MmNode::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MmNode {
    Table,
    Id,
    OsmId,
    Coord,
}

#[derive(DeriveIden)]
enum MmWay {
    Table,
    Id,
    OsmId,
    Name,
    Highway,
    Oneway,
    Path,
}

#[derive(DeriveIden)]
enum MmWayNode {
    Table,
    Id,
    WayId,
    NodeId,
    Index,
    Size,
}

#[derive(DeriveIden)]
enum MmSegment {
    Table,
    Id,
    WayId,
    OsmId,
    Index,
    Size,
    Name,
    Highway,
    Oneway,
    Geometry,
}

#[derive(DeriveIden)]
enum MmSegmentNode {
    Table,
    Id,
    SegmentId,
    NodeId,
    Index,
    Size,
}

fn big_serial_pk<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .take()
}
